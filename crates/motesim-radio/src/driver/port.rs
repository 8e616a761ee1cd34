//! The chip side of the byte driver.
//!
//! [`ChipPort`] is what the byte driver needs from an emulated radio chip.
//! [`EmulatedChip`] is a small stand-in with either a receive FIFO or a
//! single receive register, used by scripted motes and tests.

use std::collections::VecDeque;

/// Receive path of an emulated radio chip.
pub trait ChipPort: Send {
    /// Whether the receive state machine is waiting for a frame.
    fn accepts_bytes(&self) -> bool;

    /// Hand one byte to the chip. Returns false if the chip dropped it.
    fn receive_byte(&mut self, byte: u8) -> bool;
}

/// How an [`EmulatedChip`] stores inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveBuffer {
    /// Unbounded FIFO (CC2420 style).
    Fifo,
    /// One-byte register with a receive flag (USART style).
    Register,
}

/// Minimal emulated chip.
#[derive(Debug, Clone)]
pub struct EmulatedChip {
    buffer: ReceiveBuffer,
    listening: bool,
    fifo: VecDeque<u8>,
}

impl EmulatedChip {
    /// A chip with a receive FIFO, listening.
    pub fn fifo() -> Self {
        EmulatedChip {
            buffer: ReceiveBuffer::Fifo,
            listening: true,
            fifo: VecDeque::new(),
        }
    }

    /// A chip with a single receive register, listening.
    pub fn register() -> Self {
        EmulatedChip {
            buffer: ReceiveBuffer::Register,
            ..Self::fifo()
        }
    }

    /// Whether the receive path is searching for a frame.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Enter or leave the listening state.
    pub fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
    }

    /// Whether a received byte is waiting to be read.
    pub fn rx_flag(&self) -> bool {
        !self.fifo.is_empty()
    }

    /// Read one received byte, clearing the receive flag.
    pub fn read_byte(&mut self) -> Option<u8> {
        self.fifo.pop_front()
    }

    /// Read every received byte.
    pub fn drain(&mut self) -> Vec<u8> {
        self.fifo.drain(..).collect()
    }
}

impl ChipPort for EmulatedChip {
    fn accepts_bytes(&self) -> bool {
        self.listening
    }

    fn receive_byte(&mut self, byte: u8) -> bool {
        if self.buffer == ReceiveBuffer::Register && !self.fifo.is_empty() {
            return false;
        }
        self.fifo.push_back(byte);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_drops_unread_byte() {
        let mut chip = EmulatedChip::register();
        assert!(chip.receive_byte(1));
        assert!(!chip.receive_byte(2));
        assert_eq!(chip.read_byte(), Some(1));
        assert!(chip.receive_byte(3));
        assert_eq!(chip.drain(), vec![3]);
    }

    #[test]
    fn test_fifo_keeps_everything() {
        let mut chip = EmulatedChip::fifo();
        for b in 0..5 {
            assert!(chip.receive_byte(b));
        }
        assert_eq!(chip.drain(), vec![0, 1, 2, 3, 4]);
        chip.set_listening(false);
        assert!(!chip.accepts_bytes());
    }
}
