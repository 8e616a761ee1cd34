//! Radio frame codec
//!
//! This crate converts between the logical payload a mote hands to its radio
//! and the byte sequence the radio chip actually puts on the air.
//!
//! # Frame Overview
//!
//! A hardware frame is built from optional sections around a length byte:
//!
//! ```text
//! [preamble x4][sync][length][driver header x4][payload][crc16][timestamp x3][footer x2]
//! ```
//!
//! The length byte counts every byte after itself. The CRC covers the driver
//! header and the payload. Which sections exist is decided by a
//! [`FrameLayout`]; [`FrameLayout::cc2420`] enables all of them.
//!
//! # Example
//!
//! ```rust
//! use motesim_frame::{decode_frame, encode_frame, FrameLayout};
//!
//! let layout = FrameLayout::cc2420();
//! let frame = encode_frame(&layout, &[1, 2, 3]).unwrap();
//! assert_eq!(frame.len(), layout.frame_len(3));
//! assert_eq!(decode_frame(&layout, &frame).unwrap(), vec![1, 2, 3]);
//! ```

mod codec;
mod crc;
mod error;
mod layout;

pub use codec::*;
pub use crc::*;
pub use error::*;
pub use layout::*;
