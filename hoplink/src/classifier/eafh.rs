//! Enhanced sliding-window channel classifier.
//!
//! Tracks two packet-delivery-ratio windows per channel and updates the
//! used-channel list once per connection event: channels whose short window
//! sags are excluded; excluded channels earn their way back through an
//! exploration score that grows with disuse and discounts neighbourhood
//! loss. A cooldown spaces the pushes handed to the link layer.
//!
//! The numeric constants (0.95 exclusion threshold, 6-event cooldown, the
//! doubled leaky weight, the 200 normaliser, window depths 15 and 20) are
//! part of the algorithm; changing them changes the published hop traces.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ChannelMap;
use crate::events::LinkEvent;
use crate::time::Timestamp;
use crate::types::DATA_CHANNEL_COUNT;

const W_SHORT: usize = 15;
const W_LONG: usize = 20;
const EXCLUSION_THRESHOLD: f64 = 0.95;
const LEAKY_WEIGHT: f64 = 2.0;
const EXPLORE_NORMALISER: f64 = 200.0;
const UPDATE_COOLDOWN: u32 = 6;

/// Tunable parameters of the enhanced classifier. The algorithm constants
/// above are deliberately not configurable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EafhParams {}

/// Fixed-depth PDR window with a cached sum.
///
/// Seeded with full delivery so the scoring formulas start from an all-good
/// state; `filled` counts real samples so the exclusion rule never judges a
/// channel on seed values alone.
#[derive(Clone, Debug)]
struct PdrWindow {
    samples: Vec<f64>,
    cursor: usize,
    sum: f64,
    filled: usize,
}

impl PdrWindow {
    fn new(depth: usize) -> Self {
        Self {
            samples: vec![1.0; depth],
            cursor: 0,
            sum: depth as f64,
            filled: 0,
        }
    }

    fn push(&mut self, value: f64) {
        self.sum += value - self.samples[self.cursor];
        self.samples[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.samples.len();
        if self.filled < self.samples.len() {
            self.filled += 1;
        }
    }

    fn sum(&self) -> f64 {
        self.sum
    }

    fn is_full(&self) -> bool {
        self.filled == self.samples.len()
    }
}

/// Per-channel classifier state.
#[derive(Clone, Debug)]
struct ChannelState {
    short: PdrWindow,
    long: PdrWindow,
    /// Connection events since this channel last carried traffic.
    last_use: u32,
    /// Transmissions observed in the current event.
    txs: u32,
    /// Acknowledged exchanges observed in the current event.
    acks: u32,
    /// Event count at the most recent exclusion.
    excluded_at: Option<u64>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            short: PdrWindow::new(W_SHORT),
            long: PdrWindow::new(W_LONG),
            last_use: 0,
            txs: 0,
            acks: 0,
            excluded_at: None,
        }
    }
}

/// Enhanced classifier state for one connection.
pub struct EafhClassifier {
    channels: Vec<ChannelState>,
    used: ChannelMap,
    /// The list most recently handed to the link layer.
    last_pushed: ChannelMap,
    /// Connection events since the last push.
    last_update_cnt: u32,
    /// Monotonic count of processed connection events.
    events_seen: u64,
    /// Proposal produced by the latest event, awaiting a poll.
    pending: Option<ChannelMap>,
}

impl EafhClassifier {
    pub fn new(_params: EafhParams, initial: ChannelMap) -> Self {
        Self {
            channels: (0..DATA_CHANNEL_COUNT).map(|_| ChannelState::new()).collect(),
            used: initial,
            last_pushed: initial,
            last_update_cnt: 0,
            events_seen: 0,
            pending: None,
        }
    }

    pub fn used_channels(&self) -> ChannelMap {
        self.used
    }

    /// Event count at which a channel was most recently excluded.
    pub fn exclusion_event(&self, channel: u8) -> Option<u64> {
        self.channels.get(channel as usize).and_then(|c| c.excluded_at)
    }

    pub fn on_link_event(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::TransmissionStarted { channel, .. } => {
                if let Some(state) = self.channels.get_mut(*channel as usize) {
                    state.txs += 1;
                }
            }
            LinkEvent::ReceptionEnded {
                channel,
                acknowledged,
                ..
            } => {
                // Delivery is judged by the peer's NESN acknowledging our
                // transmission, not by the frame merely passing its CRC.
                if *acknowledged {
                    if let Some(state) = self.channels.get_mut(*channel as usize) {
                        state.acks += 1;
                    }
                }
            }
            LinkEvent::ConnectionEventEnded { channel, .. } => {
                self.on_event_end(*channel);
            }
            _ => {}
        }
    }

    /// Poll for a new used-channel list produced by the latest event.
    pub fn tick(&mut self, _now: Timestamp) -> Option<ChannelMap> {
        self.pending.take()
    }

    /// The per-event update, run when a connection event closes.
    fn on_event_end(&mut self, event_channel: u8) {
        self.events_seen += 1;

        // Fold this event's delivery ratio into both windows for every
        // channel that carried traffic; idle channels coast on history.
        for state in &mut self.channels {
            if state.txs > 0 {
                let pdr = (state.acks as f64 / state.txs as f64).min(1.0);
                state.short.push(pdr);
                state.long.push(pdr);
            }
            state.txs = 0;
            state.acks = 0;
            state.last_use += 1;
        }
        if let Some(state) = self.channels.get_mut(event_channel as usize) {
            state.last_use = 0;
        }

        let explore = self.exploration_scores();
        let leaky = self.leaky_losses();

        for ch in 0..DATA_CHANNEL_COUNT {
            let idx = ch as usize;
            if self.used.contains(ch) {
                // Only a short window full of real samples can exclude.
                let short = &self.channels[idx].short;
                if short.is_full() && short.sum() / W_SHORT as f64 <= EXCLUSION_THRESHOLD {
                    self.used.remove(ch);
                    self.channels[idx].excluded_at = Some(self.events_seen);
                }
            } else if explore[idx] + LEAKY_WEIGHT * leaky[idx] >= 1.0 {
                self.used.insert(ch);
            }
        }

        // Never hand the link layer fewer than two channels: top up from the
        // best long-window history.
        while self.used.len() < 2 {
            let best = (0..DATA_CHANNEL_COUNT)
                .filter(|&ch| !self.used.contains(ch))
                .max_by(|&a, &b| {
                    self.channels[a as usize]
                        .long
                        .sum()
                        .total_cmp(&self.channels[b as usize].long.sum())
                })
                .expect("fewer than two used channels leaves candidates");
            self.used.insert(best);
        }

        // Metrics first, then the cooldown check.
        if self.last_update_cnt > UPDATE_COOLDOWN && self.used != self.last_pushed {
            debug!(
                channels = self.used.len(),
                event = self.events_seen,
                "pushing new channel list"
            );
            self.pending = Some(self.used);
            self.last_pushed = self.used;
            self.last_update_cnt = 0;
        } else {
            self.last_update_cnt += 1;
        }
    }

    fn exploration_scores(&self) -> Vec<f64> {
        self.channels
            .iter()
            .map(|state| {
                let starvation = W_LONG as f64 + 1.0 - state.long.sum();
                (state.last_use as f64 / starvation) / EXPLORE_NORMALISER
            })
            .collect()
    }

    /// Smoothed neighbour loss: the mean long-window shortfall of the
    /// channel and its lower neighbour, negated. Channel 0 stands alone.
    fn leaky_losses(&self) -> Vec<f64> {
        (0..self.channels.len())
            .map(|idx| {
                let own = self.channels[idx].long.sum();
                let mean = if idx == 0 {
                    own
                } else {
                    (self.channels[idx - 1].long.sum() + own) / 2.0
                };
                -(1.0 - mean / W_LONG as f64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessAddress, PhyMode, Role};

    fn tx(channel: u8) -> LinkEvent {
        LinkEvent::TransmissionStarted {
            at: Timestamp::ZERO,
            access_address: AccessAddress(0x487647F2),
            channel,
            phy: PhyMode::Le1M,
            role: Role::Central,
            crc_ok: true,
            frame_len: 9,
        }
    }

    fn rx(channel: u8, acked: bool) -> LinkEvent {
        LinkEvent::ReceptionEnded {
            at: Timestamp::ZERO,
            access_address: AccessAddress(0x487647F2),
            channel,
            phy: PhyMode::Le1M,
            role: Role::Central,
            peer_id: 2,
            rssi_dbm: -40,
            sinr_db: 20,
            success: acked,
            acknowledged: acked,
            frame_len: 9,
        }
    }

    fn event_end(channel: u8, counter: u16) -> LinkEvent {
        LinkEvent::ConnectionEventEnded {
            at: Timestamp::ZERO,
            counter,
            channel,
            tx_packets: 2,
            rx_packets: 2,
            crc_failed: 0,
        }
    }

    fn classifier() -> EafhClassifier {
        EafhClassifier::new(EafhParams::default(), ChannelMap::ALL)
    }

    /// Drive one connection event on `channel` with the given delivery ratio
    /// out of `txs` exchanges.
    fn drive_event(c: &mut EafhClassifier, channel: u8, counter: u16, txs: u32, acks: u32) {
        for _ in 0..txs {
            c.on_link_event(&tx(channel));
        }
        for _ in 0..acks {
            c.on_link_event(&rx(channel, true));
        }
        for _ in 0..(txs - acks) {
            c.on_link_event(&rx(channel, false));
        }
        c.on_link_event(&event_end(channel, counter));
    }

    #[test]
    fn test_lossless_traffic_keeps_all_channels() {
        let mut c = classifier();
        for counter in 0..100u16 {
            let channel = (counter % 37) as u8;
            drive_event(&mut c, channel, counter, 2, 2);
            assert!(c.tick(Timestamp::ZERO).is_none());
        }
        assert_eq!(c.used_channels(), ChannelMap::ALL);
    }

    #[test]
    fn test_half_pdr_excludes_channel_when_window_fills() {
        let mut c = classifier();
        // Channel 10 at 50% delivery, every event. The short window needs
        // 15 real samples before it may exclude; at that point the ratio is
        // 0.5 and the channel goes out.
        let mut excluded_after = None;
        for counter in 0..15u16 {
            drive_event(&mut c, 10, counter, 2, 1);
            if excluded_after.is_none() && !c.used_channels().contains(10) {
                excluded_after = Some(counter + 1);
            }
        }
        assert_eq!(excluded_after, Some(15));
        assert_eq!(c.exclusion_event(10), Some(15));
    }

    #[test]
    fn test_exploration_restores_idle_channel() {
        let mut c = classifier();
        // Drag channel 10 down to total loss so it is excluded.
        for counter in 0..15u16 {
            drive_event(&mut c, 10, counter, 2, 0);
        }
        assert!(!c.used_channels().contains(10));

        // Perfect delivery on a neighbour keeps its long window at full
        // marks while channel 10 idles; disuse eventually drives the
        // exploration score past the leaky-loss discount.
        let mut restored = false;
        for i in 0..10_000u32 {
            drive_event(&mut c, 9, i as u16, 2, 2);
            c.tick(Timestamp::ZERO);
            if c.used_channels().contains(10) {
                restored = true;
                break;
            }
        }
        assert!(restored, "channel 10 must eventually return");
    }

    #[test]
    fn test_fallback_keeps_two_channels() {
        let mut c = EafhClassifier::new(EafhParams::default(), ChannelMap::from_channels([4, 9]));
        // Total loss on both channels would empty the set; the fallback
        // must keep at least two.
        for counter in 0..40u16 {
            let channel = if counter % 2 == 0 { 4 } else { 9 };
            drive_event(&mut c, channel, counter, 2, 0);
            assert!(c.used_channels().len() >= 2);
        }
    }

    #[test]
    fn test_cooldown_spaces_pushes() {
        let mut c = classifier();
        let mut push_events: Vec<u64> = Vec::new();
        for counter in 0..200u16 {
            // Total loss rotating over three channels: their windows fill
            // and they drop out a few events apart, forcing several list
            // changes.
            let channel = (counter % 3) as u8;
            drive_event(&mut c, channel, counter, 2, 0);
            if c.tick(Timestamp::ZERO).is_some() {
                push_events.push(c.events_seen);
            }
        }
        assert!(push_events.len() >= 2);
        for pair in push_events.windows(2) {
            assert!(
                pair[1] - pair[0] >= 7,
                "pushes at events {} and {} violate the cooldown",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_valid_frame_without_ack_is_not_delivery() {
        let mut c = classifier();
        // A CRC-clean frame whose NESN did not move (the peer repeating its
        // own packet) must not count towards the delivery ratio.
        for counter in 0..20u16 {
            for _ in 0..2 {
                c.on_link_event(&tx(10));
            }
            for _ in 0..2 {
                let mut ev = rx(10, false);
                if let LinkEvent::ReceptionEnded { success, .. } = &mut ev {
                    *success = true;
                }
                c.on_link_event(&ev);
            }
            c.on_link_event(&event_end(10, counter));
        }
        // Zero acknowledged out of two transmissions per event: excluded
        // once the short window fills.
        assert!(!c.used_channels().contains(10));
    }

    #[test]
    fn test_windows_seeded_optimistic() {
        let c = classifier();
        for state in &c.channels {
            assert_eq!(state.short.sum(), W_SHORT as f64);
            assert_eq!(state.long.sum(), W_LONG as f64);
        }
    }

    #[test]
    fn test_pdr_window_push_updates_sum() {
        let mut w = PdrWindow::new(4);
        assert_eq!(w.sum(), 4.0);
        w.push(0.0);
        assert_eq!(w.sum(), 3.0);
        w.push(0.5);
        assert_eq!(w.sum(), 2.5);
        // Wrapping overwrites the oldest samples.
        w.push(0.0);
        w.push(0.0);
        w.push(1.0); // replaces the first 0.0
        assert_eq!(w.sum(), 1.5);
    }
}
