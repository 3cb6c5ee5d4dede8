//! Data-channel map and the hop-sequence channel selection function.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DATA_CHANNEL_COUNT;

/// Mask covering all 37 data channels.
const ALL_CHANNELS_MASK: u64 = (1u64 << DATA_CHANNEL_COUNT) - 1;

/// Set of used data channels (indices 0..=36) as a 37-bit bitmap.
///
/// The wire form is the 5-byte little-endian channel map carried in the
/// Channel Map Indication, with the top three bits of the last byte zero.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap(u64);

impl ChannelMap {
    /// All 37 data channels marked used.
    pub const ALL: ChannelMap = ChannelMap(ALL_CHANNELS_MASK);

    /// Empty map. Not a valid used-channel set on its own; callers must
    /// uphold the |set| >= 2 invariant before handing a map to the link layer.
    pub const EMPTY: ChannelMap = ChannelMap(0);

    /// Build a map from an iterator of channel indices. Out-of-range indices
    /// are ignored.
    pub fn from_channels<I: IntoIterator<Item = u8>>(channels: I) -> Self {
        let mut map = ChannelMap::EMPTY;
        for ch in channels {
            map.insert(ch);
        }
        map
    }

    /// Parse the 5-byte wire form.
    pub fn from_bytes(bytes: &[u8; 5]) -> Self {
        let mut raw = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            raw |= (b as u64) << (8 * i);
        }
        ChannelMap(raw & ALL_CHANNELS_MASK)
    }

    /// Serialize to the 5-byte wire form.
    pub fn to_bytes(self) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (self.0 >> (8 * i)) as u8;
        }
        bytes
    }

    /// Check whether a channel is marked used.
    pub fn contains(self, channel: u8) -> bool {
        channel < DATA_CHANNEL_COUNT && self.0 & (1u64 << channel) != 0
    }

    /// Mark a channel used.
    pub fn insert(&mut self, channel: u8) {
        if channel < DATA_CHANNEL_COUNT {
            self.0 |= 1u64 << channel;
        }
    }

    /// Mark a channel unused.
    pub fn remove(&mut self, channel: u8) {
        if channel < DATA_CHANNEL_COUNT {
            self.0 &= !(1u64 << channel);
        }
    }

    /// Number of used channels.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// True when no channel is used.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate used channel indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..DATA_CHANNEL_COUNT).filter(move |&ch| self.contains(ch))
    }

    /// The n-th used channel in ascending order (the remapping table of the
    /// channel selection algorithm). Panics if `n >= len()`.
    pub fn nth(self, n: usize) -> u8 {
        self.iter()
            .nth(n)
            .expect("remapping index within used-channel count")
    }
}

impl fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelMap({:#011x}, n={})", self.0, self.len())
    }
}

/// Channel Selection Algorithm #1.
///
/// The unmapped channel advances by the hop increment once per connection
/// event, starting from zero before the first event; with a 0-based event
/// counter that is `(hop * (counter + 1)) mod 37`. When the unmapped channel
/// is not in the used map it is remapped through the ascending used-channel
/// table at index `unmapped mod len`.
///
/// Deterministic in (hop, counter, map): identical inputs reproduce identical
/// hop sequences. A map update takes effect on the next invocation.
pub fn select_channel(hop_increment: u8, event_counter: u16, used: &ChannelMap) -> u8 {
    debug_assert!(!used.is_empty(), "used-channel set must not be empty");
    let unmapped =
        ((hop_increment as u32 * (event_counter as u32 + 1)) % DATA_CHANNEL_COUNT as u32) as u8;
    if used.contains(unmapped) {
        unmapped
    } else {
        used.nth(unmapped as usize % used.len())
    }
}
