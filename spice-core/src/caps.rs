//! Capability bitmasks exchanged during link negotiation.
//!
//! The client advertises at most one word per category. The server answers
//! with an arbitrary number of words per category; words it omits are
//! treated as all-capabilities-disabled.

use bitflags::bitflags;

bitflags! {
    /// Capabilities shared by every channel type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommonCaps: u32 {
        const AUTH_SELECTION = 1 << 0;
        const AUTH_SPICE = 1 << 1;
        const AUTH_SASL = 1 << 2;
        /// Six-byte per-message header instead of the eighteen-byte one.
        const MINI_HEADER = 1 << 3;
    }
}

bitflags! {
    /// Display-channel specific capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DisplayCaps: u32 {
        const SIZED_STREAM = 1 << 0;
        const MONITORS_CONFIG = 1 << 1;
        const COMPOSITE = 1 << 2;
        const A8_SURFACE = 1 << 3;
        const STREAM_REPORT = 1 << 4;
        const LZ4_COMPRESSION = 1 << 5;
        const PREF_COMPRESSION = 1 << 6;
    }
}

/// Capabilities the server advertised in its link reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    common: Vec<u32>,
    channel: Vec<u32>,
}

impl ServerCapabilities {
    pub fn new(common: Vec<u32>, channel: Vec<u32>) -> Self {
        Self { common, channel }
    }

    /// Parse the capability blob that follows the link reply.
    ///
    /// The blob holds `num_common` words followed by `num_channel` words.
    /// Counts are trusted only as far as the blob backs them: words the
    /// server declared but did not send are dropped, which reads as
    /// disabled.
    pub fn parse(blob: &[u8], num_common: u32, num_channel: u32) -> Self {
        let available = blob.len() / 4;
        let n_common = (num_common as usize).min(available);
        let n_channel = (num_channel as usize).min(available - n_common);

        let mut words = blob
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        let common = words.by_ref().take(n_common).collect();
        let channel = words.take(n_channel).collect();
        Self { common, channel }
    }

    /// Test a common capability by bit index.
    pub fn has_common_bit(&self, bit: u32) -> bool {
        test_bit(&self.common, bit)
    }

    /// Test a channel-specific capability by bit index.
    pub fn has_channel_bit(&self, bit: u32) -> bool {
        test_bit(&self.channel, bit)
    }

    /// Every flag in `caps` is present in the first common word.
    pub fn has_common(&self, caps: CommonCaps) -> bool {
        let word = self.common.first().copied().unwrap_or(0);
        CommonCaps::from_bits_truncate(word).contains(caps)
    }

    /// Every flag in `caps` is present in the first display word.
    pub fn has_display(&self, caps: DisplayCaps) -> bool {
        let word = self.channel.first().copied().unwrap_or(0);
        DisplayCaps::from_bits_truncate(word).contains(caps)
    }

    pub fn common_words(&self) -> &[u32] {
        &self.common
    }

    pub fn channel_words(&self) -> &[u32] {
        &self.channel
    }
}

fn test_bit(words: &[u32], bit: u32) -> bool {
    let index = (bit / 32) as usize;
    words
        .get(index)
        .is_some_and(|word| word & (1 << (bit % 32)) != 0)
}
