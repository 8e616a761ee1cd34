//! Radios for motesim.
//!
//! - [`medium`]: the shared radio medium, tracking transmissions and
//!   collisions between registered radios
//! - [`policy`]: connectivity policies deciding who can hear whom
//! - [`packet_radio`]: packet-granular radios for coarse motes
//! - [`driver`]: byte-level drivers between emulated chips and the medium

pub mod driver;
pub mod medium;
pub mod packet_radio;
pub mod policy;

pub use driver::{ByteRadio, ChipKind, ChipModel, ChipPort, EmulatedChip, FeedMode, StalledDelivery};
pub use medium::{Connection, MediumSnapshot, MediumStats, RadioMedium};
pub use packet_radio::PacketRadio;
pub use policy::{build_policy, ConnectivityPolicy, MediumConfig, MediumKind, PolicyError};

use motesim_common::MoteId;

/// Metric labels for per-radio series.
pub fn mote_label(mote: MoteId) -> [(&'static str, String); 1] {
    [("mote", mote.0.to_string())]
}
