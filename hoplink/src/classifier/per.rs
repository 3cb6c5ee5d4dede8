//! Baseline packet-error-rate classifier.
//!
//! Every reception outcome from the peripheral of interest lands in a
//! per-channel ring buffer of tri-state cells. A periodic pass marks a
//! channel bad once its error rate over the observed cells exceeds the
//! threshold; when too few good channels remain the classifier collapses
//! back to the initial set and starts over.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ChannelMap;
use crate::events::LinkEvent;
use crate::time::{Duration, Timestamp};
use crate::types::DATA_CHANNEL_COUNT;

/// A ring-buffer cell. `Empty` means the slot has not been written since the
/// last clear, so a channel is never judged on outcomes it does not have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cell {
    Empty,
    Success,
    Failure,
}

/// Tunable parameters of the baseline classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerParams {
    /// PER percentage above which a channel is marked bad.
    pub threshold_percent: u32,
    /// Minimum good-channel count before the collapse rule fires.
    pub preferred_minimum_good: usize,
    /// Minimum observed outcomes before a channel may be classified.
    pub min_receptions: usize,
    /// Ring buffer depth per channel.
    pub buffer_size: usize,
    /// Interval between classification passes.
    pub classify_every: Duration,
}

impl Default for PerParams {
    fn default() -> Self {
        Self {
            threshold_percent: 40,
            preferred_minimum_good: 2,
            min_receptions: 4,
            buffer_size: 20,
            classify_every: Duration::from_secs(2),
        }
    }
}

/// Baseline classifier state for one connection.
pub struct PerClassifier {
    params: PerParams,
    /// Peripheral whose receptions feed this classifier.
    peer_id: u32,
    /// Initial set restored by the collapse rule.
    initial: ChannelMap,
    /// Channels currently considered good.
    good: ChannelMap,
    rings: Vec<Vec<Cell>>,
    cursors: Vec<usize>,
    next_pass: Timestamp,
}

impl PerClassifier {
    pub fn new(params: PerParams, peer_id: u32, initial: ChannelMap) -> Self {
        let depth = params.buffer_size.max(params.min_receptions);
        let next_pass = Timestamp::ZERO + params.classify_every;
        Self {
            params,
            peer_id,
            initial,
            good: initial,
            rings: vec![vec![Cell::Empty; depth]; DATA_CHANNEL_COUNT as usize],
            cursors: vec![0; DATA_CHANNEL_COUNT as usize],
            next_pass,
        }
    }

    pub fn classify_every(&self) -> Duration {
        self.params.classify_every
    }

    pub fn good_channels(&self) -> ChannelMap {
        self.good
    }

    pub fn on_link_event(&mut self, event: &LinkEvent) {
        if let LinkEvent::ReceptionEnded {
            peer_id,
            channel,
            success,
            ..
        } = event
        {
            if *peer_id == self.peer_id {
                self.record(*channel, *success);
            }
        }
    }

    fn record(&mut self, channel: u8, success: bool) {
        let ch = channel as usize;
        if ch >= self.rings.len() {
            return;
        }
        let cursor = self.cursors[ch];
        self.rings[ch][cursor] = if success { Cell::Success } else { Cell::Failure };
        self.cursors[ch] = (cursor + 1) % self.rings[ch].len();
    }

    /// Run a classification pass when one is due. Returns the good-channel
    /// set for the link layer (which ignores a set equal to the enforced one).
    pub fn tick(&mut self, now: Timestamp) -> Option<ChannelMap> {
        if now < self.next_pass {
            return None;
        }
        self.next_pass = self.next_pass + self.params.classify_every;

        for ch in 0..DATA_CHANNEL_COUNT {
            if !self.good.contains(ch) {
                continue;
            }
            let ring = &self.rings[ch as usize];
            let observed = ring.iter().filter(|&&c| c != Cell::Empty).count();
            if observed < self.params.min_receptions {
                continue;
            }
            let failures = ring.iter().filter(|&&c| c == Cell::Failure).count();
            let per = failures * 100 / observed;
            if per as u32 > self.params.threshold_percent {
                self.good.remove(ch);
            }
        }

        if self.good.len() < self.params.preferred_minimum_good {
            debug!(
                remaining = self.good.len(),
                preferred = self.params.preferred_minimum_good,
                "too few good channels, restoring the initial set"
            );
            self.good = self.initial;
            for ring in &mut self.rings {
                ring.fill(Cell::Empty);
            }
            self.cursors.fill(0);
        }

        Some(self.good)
    }
}
