//! Hardware frame encoding and decoding.
//!
//! [`encode_frame`] wraps a logical payload in the sections a chip puts on the
//! air, and [`decode_frame`] strips them again. Both are pure functions of the
//! [`FrameLayout`].
//!
//! Decoding takes the checksum, timestamp and footer positionally and does not
//! re-verify the CRC. Use [`verify_checksum`] when the check is wanted.

use crate::crc::crc16_add;
use crate::layout::{FrameLayout, DRIVER_HEADER_LEN, PREAMBLE_LEN, TIMESTAMP_LEN};
use crate::FrameError;

// ============================================================================
// Encoding
// ============================================================================

/// Encode a payload into a hardware frame.
pub fn encode_frame(layout: &FrameLayout, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let max = layout.effective_max_payload();
    if payload.len() > max {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max,
        });
    }

    let mut buf = Vec::with_capacity(layout.frame_len(payload.len()));
    let mut crc: u16 = 0;

    // 1. Preamble (4 bytes)
    if layout.preamble {
        buf.extend_from_slice(&[layout.preamble_byte; PREAMBLE_LEN]);
    }

    // 2. Sync (1 byte)
    if layout.sync {
        buf.push(layout.sync_byte);
    }

    // 3. Length: everything after this byte
    buf.push(layout.length_field(payload.len()) as u8);

    // 4. Driver header (4 zero bytes, covered by the CRC)
    if layout.driver_header {
        for _ in 0..DRIVER_HEADER_LEN {
            buf.push(0);
            crc = crc16_add(0, crc);
        }
    }

    // 5. Payload
    for &b in payload {
        crc = crc16_add(b, crc);
    }
    buf.extend_from_slice(payload);

    // 6. Checksum
    if layout.checksum {
        buf.extend_from_slice(&layout.checksum_order.to_bytes(crc));
    }

    // 7. Timestamp placeholder
    if layout.timestamp {
        buf.extend_from_slice(&[0; TIMESTAMP_LEN]);
    }

    // 8. Footer: RSSI, CRC ok + correlation
    if layout.footer {
        buf.push(layout.footer_rssi);
        buf.push(layout.footer_crc_correlation);
    }

    Ok(buf)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode the payload out of a hardware frame.
pub fn decode_frame(layout: &FrameLayout, frame: &[u8]) -> Result<Vec<u8>, FrameError> {
    let (start, len) = payload_bounds(layout, frame)?;
    Ok(frame[start..start + len].to_vec())
}

/// Read the length byte of a frame, if enough bytes are present.
pub fn read_length_field(layout: &FrameLayout, frame: &[u8]) -> Option<u8> {
    frame.get(layout.length_offset()).copied()
}

/// Payload offset and size within a frame.
fn payload_bounds(layout: &FrameLayout, frame: &[u8]) -> Result<(usize, usize), FrameError> {
    let length_offset = layout.length_offset();
    let length = read_length_field(layout, frame)
        .ok_or_else(|| FrameError::truncated(length_offset, length_offset + 1, frame.len()))?;

    let overhead = layout.overhead_after_length();
    if (length as usize) < overhead {
        return Err(FrameError::InvalidLength {
            length,
            trailer: overhead,
        });
    }

    let start = layout.header_len() + layout.driver_header_len();
    let payload_len = length as usize - overhead;
    let needed = start + payload_len + layout.trailer_len();
    if frame.len() < needed {
        return Err(FrameError::truncated(start, needed, frame.len()));
    }

    Ok((start, payload_len))
}

/// Check the CRC16 stored in a frame against its header and payload.
pub fn verify_checksum(layout: &FrameLayout, frame: &[u8]) -> Result<(), FrameError> {
    if !layout.checksum {
        return Err(FrameError::NoChecksum);
    }
    let (start, len) = payload_bounds(layout, frame)?;
    let covered = &frame[layout.header_len()..start + len];
    let expected = covered.iter().fold(0u16, |acc, &b| crc16_add(b, acc));

    let at = start + len;
    let stored = [frame[at], frame[at + 1]];
    let actual = layout.checksum_order.from_bytes(stored);

    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
