//! Error types for motesim-frame.

use thiserror::Error;

/// Errors that can occur while building or parsing a hardware frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload does not fit the chip's frame.
    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum payload size for the layout.
        max: usize,
    },

    /// Frame ended before a required section.
    #[error("Frame truncated at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        /// Offset of the section that could not be read.
        offset: usize,
        /// Total bytes needed to read the section.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Length byte is smaller than the enabled trailer sections.
    #[error("Invalid length byte {length}: trailer alone needs {trailer} bytes")]
    InvalidLength {
        /// Length byte read from the frame.
        length: u8,
        /// Bytes taken by the driver header and trailer sections.
        trailer: usize,
    },

    /// Checksum mismatch (only reported by explicit verification).
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame.
        expected: u16,
        /// Checksum stored in the frame.
        actual: u16,
    },

    /// The layout has no checksum section to verify.
    #[error("Frame layout has no checksum section")]
    NoChecksum,
}

impl FrameError {
    /// Create a truncation error.
    pub fn truncated(offset: usize, needed: usize, available: usize) -> Self {
        FrameError::Truncated {
            offset,
            needed,
            available,
        }
    }
}
