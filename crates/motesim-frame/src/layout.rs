//! Static per-chip frame layouts.
//!
//! A [`FrameLayout`] says which sections a chip puts on the air around the
//! payload. It is an immutable value handed to the codec and the byte driver
//! at construction time.
//!
//! | Section          | Size | Flag            |
//! |------------------|------|-----------------|
//! | preamble         | 4    | `preamble`      |
//! | sync             | 1    | `sync`          |
//! | length           | 1    | always          |
//! | driver header    | 4    | `driver_header` |
//! | payload          | var  | always          |
//! | checksum (CRC16) | 2    | `checksum`      |
//! | timestamp        | 3    | `timestamp`     |
//! | footer           | 2    | `footer`        |

use serde::{Deserialize, Serialize};

use crate::crc::ChecksumOrder;

/// Preamble length in bytes.
pub const PREAMBLE_LEN: usize = 4;
/// Sync byte length.
pub const SYNC_LEN: usize = 1;
/// Length field size.
pub const LENGTH_LEN: usize = 1;
/// Driver header (MAC layer) length.
pub const DRIVER_HEADER_LEN: usize = 4;
/// Checksum length.
pub const CHECKSUM_LEN: usize = 2;
/// Timestamp placeholder length.
pub const TIMESTAMP_LEN: usize = 3;
/// Footer length (RSSI + CRC/correlation).
pub const FOOTER_LEN: usize = 2;

/// Default maximum payload size.
pub const DEFAULT_MAX_PAYLOAD: usize = 127;

/// Sync byte written by the CC2420 driver.
pub const CC2420_SYNC_BYTE: u8 = 0x7A;
/// CRC-ok/correlation byte written into the footer.
pub const FOOTER_CRC_CORRELATION: u8 = 0x80;

/// Which sections a chip frames its payload with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// 4-byte preamble present.
    pub preamble: bool,
    /// Sync byte present.
    pub sync: bool,
    /// 4-byte driver header present.
    pub driver_header: bool,
    /// CRC16 present.
    pub checksum: bool,
    /// 3-byte timestamp present.
    pub timestamp: bool,
    /// 2-byte footer present.
    pub footer: bool,
    /// Value of each preamble byte.
    pub preamble_byte: u8,
    /// Value of the sync byte.
    pub sync_byte: u8,
    /// Byte order of the checksum.
    pub checksum_order: ChecksumOrder,
    /// RSSI value written into the footer.
    pub footer_rssi: u8,
    /// CRC/correlation value written into the footer.
    pub footer_crc_correlation: u8,
    /// Largest payload the chip accepts.
    pub max_payload: usize,
}

impl FrameLayout {
    /// CC2420 with the X-MAC driver: every section enabled.
    pub const fn cc2420() -> Self {
        FrameLayout {
            preamble: true,
            sync: true,
            driver_header: true,
            checksum: true,
            timestamp: true,
            footer: true,
            preamble_byte: 0x00,
            sync_byte: CC2420_SYNC_BYTE,
            checksum_order: ChecksumOrder::LowFirst,
            footer_rssi: 0x00,
            footer_crc_correlation: FOOTER_CRC_CORRELATION,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// TR1001 byte radio: preamble, sync, length, payload and CRC.
    pub const fn tr1001() -> Self {
        FrameLayout {
            preamble: true,
            sync: true,
            driver_header: false,
            checksum: true,
            timestamp: false,
            footer: false,
            preamble_byte: 0xAA,
            sync_byte: 0xFF,
            checksum_order: ChecksumOrder::LowFirst,
            footer_rssi: 0x00,
            footer_crc_correlation: FOOTER_CRC_CORRELATION,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Bare layout: just the length byte and the payload.
    pub const fn bare() -> Self {
        FrameLayout {
            preamble: false,
            sync: false,
            driver_header: false,
            checksum: false,
            timestamp: false,
            footer: false,
            preamble_byte: 0x00,
            sync_byte: 0x00,
            checksum_order: ChecksumOrder::LowFirst,
            footer_rssi: 0x00,
            footer_crc_correlation: FOOTER_CRC_CORRELATION,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Offset of the length byte.
    pub const fn length_offset(&self) -> usize {
        let mut offset = 0;
        if self.preamble {
            offset += PREAMBLE_LEN;
        }
        if self.sync {
            offset += SYNC_LEN;
        }
        offset
    }

    /// Bytes up to and including the length byte.
    pub const fn header_len(&self) -> usize {
        self.length_offset() + LENGTH_LEN
    }

    /// Driver header size (0 when disabled).
    pub const fn driver_header_len(&self) -> usize {
        if self.driver_header {
            DRIVER_HEADER_LEN
        } else {
            0
        }
    }

    /// Bytes after the payload.
    pub const fn trailer_len(&self) -> usize {
        let mut len = 0;
        if self.checksum {
            len += CHECKSUM_LEN;
        }
        if self.timestamp {
            len += TIMESTAMP_LEN;
        }
        if self.footer {
            len += FOOTER_LEN;
        }
        len
    }

    /// Everything counted by the length byte except the payload itself.
    pub const fn overhead_after_length(&self) -> usize {
        self.driver_header_len() + self.trailer_len()
    }

    /// Value of the length byte for a payload of `payload_len` bytes.
    pub const fn length_field(&self, payload_len: usize) -> usize {
        payload_len + self.overhead_after_length()
    }

    /// Total frame size for a payload of `payload_len` bytes.
    pub const fn frame_len(&self, payload_len: usize) -> usize {
        self.header_len() + self.length_field(payload_len)
    }

    /// Largest payload that both the chip and the length byte can carry.
    pub fn effective_max_payload(&self) -> usize {
        let by_length_byte = (u8::MAX as usize).saturating_sub(self.overhead_after_length());
        self.max_payload.min(by_length_byte)
    }

    /// Set the maximum payload size.
    pub const fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        FrameLayout::cc2420()
    }
}
