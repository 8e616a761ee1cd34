//! Static chip models.

use motesim_frame::FrameLayout;
use serde::{Deserialize, Serialize};

/// Cycles the TR1001 driver spends per byte (about 19.2 kbps at 2.4 MHz).
pub const TR1001_CYCLES_BETWEEN_BYTES: u64 = 1200;

/// Ticks without an outbound byte after which a transmission is abandoned.
pub const DEFAULT_INACTIVITY_TICKS: u64 = 4;

/// Supported radio chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipKind {
    /// 802.15.4 transceiver with a receive FIFO.
    Cc2420,
    /// Byte-oriented transceiver behind a USART.
    Tr1001,
}

/// How inbound frame bytes reach the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FeedMode {
    /// The whole frame at once, as soon as the chip accepts bytes.
    Immediate,
    /// One byte at a time as the CPU cycle counter passes each byte delay.
    Paced {
        /// Delay used when the packet carries no recorded delays.
        cycles_between_bytes: u64,
    },
}

/// What happens to an inbound frame while the chip is not ready for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StalledDelivery {
    /// Keep it until the chip becomes ready or a newer frame replaces it.
    #[default]
    HoldUntilReplaced,
    /// Drop it after this many milliseconds.
    DropAfter {
        /// Milliseconds to wait.
        ticks: u64,
    },
}

/// Everything the byte driver needs to know about a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipModel {
    /// Which chip.
    pub kind: ChipKind,
    /// Frame sections.
    pub layout: FrameLayout,
    /// Inbound feed.
    pub feed: FeedMode,
    /// Stalled inbound frame handling.
    pub stalled: StalledDelivery,
    /// Outbound inactivity window in ticks.
    pub inactivity_ticks: u64,
    /// Radio channel.
    pub channel: u8,
    /// Largest output power indicator.
    pub output_power_max: u8,
    /// Interference discards bytes queued for the chip.
    pub clear_on_interference: bool,
    /// Packets arriving while interfered are refused.
    pub reject_while_interfered: bool,
}

impl ChipModel {
    /// CC2420: full frame, immediate feed, channel 26.
    pub const fn cc2420() -> Self {
        ChipModel {
            kind: ChipKind::Cc2420,
            layout: FrameLayout::cc2420(),
            feed: FeedMode::Immediate,
            stalled: StalledDelivery::HoldUntilReplaced,
            inactivity_ticks: DEFAULT_INACTIVITY_TICKS,
            channel: 26,
            output_power_max: 31,
            clear_on_interference: false,
            reject_while_interfered: false,
        }
    }

    /// TR1001: short frame, paced byte feed.
    pub const fn tr1001() -> Self {
        ChipModel {
            kind: ChipKind::Tr1001,
            layout: FrameLayout::tr1001(),
            feed: FeedMode::Paced {
                cycles_between_bytes: TR1001_CYCLES_BETWEEN_BYTES,
            },
            stalled: StalledDelivery::HoldUntilReplaced,
            inactivity_ticks: DEFAULT_INACTIVITY_TICKS,
            channel: 0,
            output_power_max: 1,
            clear_on_interference: true,
            reject_while_interfered: true,
        }
    }

    /// Model for a chip kind.
    pub const fn for_kind(kind: ChipKind) -> Self {
        match kind {
            ChipKind::Cc2420 => Self::cc2420(),
            ChipKind::Tr1001 => Self::tr1001(),
        }
    }

    /// Replace the stalled delivery policy.
    pub const fn with_stalled(mut self, stalled: StalledDelivery) -> Self {
        self.stalled = stalled;
        self
    }

    /// Replace the channel.
    pub const fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models() {
        let cc = ChipModel::for_kind(ChipKind::Cc2420);
        assert_eq!(cc.feed, FeedMode::Immediate);
        assert_eq!(cc.layout.header_len(), 6);

        let tr = ChipModel::tr1001().with_stalled(StalledDelivery::DropAfter { ticks: 3 });
        assert_eq!(
            tr.feed,
            FeedMode::Paced {
                cycles_between_bytes: 1200
            }
        );
        assert_eq!(tr.stalled, StalledDelivery::DropAfter { ticks: 3 });
        assert!(tr.clear_on_interference);
    }
}
