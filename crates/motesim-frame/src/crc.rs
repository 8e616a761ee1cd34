//! CRC16 as computed by the radio drivers.
//!
//! This is the CRC-16/CCITT variant used by Kermit (reflected polynomial
//! 0x8408, zero initial value, no final xor), computed one byte at a time the
//! same way the embedded drivers do it so the bytes on the wire match.

/// Fold one byte into an accumulated CRC.
#[inline]
pub fn crc16_add(byte: u8, acc: u16) -> u16 {
    let mut acc = acc ^ byte as u16;
    acc = acc.rotate_left(8);
    acc ^= (acc & 0xff00) << 4;
    acc ^= (acc >> 8) >> 4;
    acc ^= (acc & 0xff00) >> 5;
    acc
}

/// Compute the CRC of a byte slice, starting from `acc`.
pub fn crc16_data(data: &[u8], acc: u16) -> u16 {
    data.iter().fold(acc, |acc, &b| crc16_add(b, acc))
}

/// Byte order the checksum is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumOrder {
    /// Low byte first (CC2420, TR1001 drivers).
    #[default]
    LowFirst,
    /// High byte first.
    HighFirst,
}

impl ChecksumOrder {
    /// Split a checksum into the two bytes written to the frame.
    pub fn to_bytes(self, crc: u16) -> [u8; 2] {
        match self {
            ChecksumOrder::LowFirst => crc.to_le_bytes(),
            ChecksumOrder::HighFirst => crc.to_be_bytes(),
        }
    }

    /// Read a checksum back from its two frame bytes.
    pub fn from_bytes(self, bytes: [u8; 2]) -> u16 {
        match self {
            ChecksumOrder::LowFirst => u16::from_le_bytes(bytes),
            ChecksumOrder::HighFirst => u16::from_be_bytes(bytes),
        }
    }
}
