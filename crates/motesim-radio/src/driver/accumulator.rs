//! Outbound frame assembly.

use bytes::{BufMut, Bytes, BytesMut};
use motesim_frame::FrameLayout;

/// Where the accumulator is in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// No byte yet.
    Idle,
    /// Waiting for the length byte.
    ReceivingHeader,
    /// Length known; waiting for the rest.
    ReceivingPayload,
    /// The declared length has been reached.
    Complete,
}

/// Collects bytes written by the chip until a whole frame is present.
#[derive(Debug)]
pub struct FrameAccumulator {
    layout: FrameLayout,
    buf: BytesMut,
    expected: Option<usize>,
    state: AccumulatorState,
}

impl FrameAccumulator {
    /// Create an accumulator for `layout`.
    pub fn new(layout: FrameLayout) -> Self {
        FrameAccumulator {
            layout,
            buf: BytesMut::with_capacity(layout.frame_len(layout.max_payload)),
            expected: None,
            state: AccumulatorState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Bytes collected so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Total frame size, once the length byte is in.
    pub fn expected_len(&self) -> Option<usize> {
        self.expected
    }

    /// Add a byte.
    pub fn push(&mut self, byte: u8) -> AccumulatorState {
        if self.state == AccumulatorState::Complete {
            self.reset();
        }
        self.buf.put_u8(byte);

        if self.expected.is_none() && self.buf.len() == self.layout.header_len() {
            self.expected = Some(self.layout.header_len() + byte as usize);
        }

        self.state = match self.expected {
            Some(expected) if self.buf.len() >= expected => AccumulatorState::Complete,
            Some(_) => AccumulatorState::ReceivingPayload,
            None => AccumulatorState::ReceivingHeader,
        };
        self.state
    }

    /// Take the collected bytes and start over.
    pub fn take_frame(&mut self) -> Bytes {
        let frame = self.buf.split().freeze();
        self.expected = None;
        self.state = AccumulatorState::Idle;
        frame
    }

    /// Discard the collected bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = None;
        self.state = AccumulatorState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motesim_frame::encode_frame;

    #[test]
    fn test_accumulates_whole_frame() {
        let layout = FrameLayout::cc2420();
        let frame = encode_frame(&layout, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        let mut acc = FrameAccumulator::new(layout);

        for (i, &b) in frame.iter().enumerate() {
            let state = acc.push(b);
            if i < 5 {
                assert_eq!(state, AccumulatorState::ReceivingHeader);
            } else if i < frame.len() - 1 {
                assert_eq!(state, AccumulatorState::ReceivingPayload);
                assert_eq!(acc.expected_len(), Some(27));
            } else {
                assert_eq!(state, AccumulatorState::Complete);
            }
        }

        assert_eq!(&acc.take_frame()[..], frame.as_slice());
        assert_eq!(acc.state(), AccumulatorState::Idle);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_push_after_complete_starts_new_frame() {
        let layout = FrameLayout::bare();
        let mut acc = FrameAccumulator::new(layout);
        assert_eq!(acc.push(1), AccumulatorState::ReceivingPayload);
        assert_eq!(acc.push(0xAB), AccumulatorState::Complete);
        assert_eq!(acc.push(0), AccumulatorState::Complete);
        assert_eq!(acc.len(), 1);
    }
}
