//! Channel-quality classifiers.
//!
//! Both variants share one narrow contract with the node: they consume
//! observable link events and, when polled, may produce a new used-channel
//! list for the link layer to enforce through the channel-map-update
//! procedure. The node holds one classifier per central connection, chosen
//! by the scenario.

mod eafh;
mod per;

pub use eafh::{EafhClassifier, EafhParams};
pub use per::{PerClassifier, PerParams};

use crate::channel::ChannelMap;
use crate::events::LinkEvent;
use crate::time::{Duration, Timestamp};

/// The classifier chosen for a connection.
pub enum Classifier {
    /// Baseline packet-error-rate classifier.
    Per(PerClassifier),
    /// Enhanced sliding-window classifier.
    Eafh(EafhClassifier),
}

impl Classifier {
    /// Feed an observable link event.
    pub fn on_link_event(&mut self, event: &LinkEvent) {
        match self {
            Classifier::Per(c) => c.on_link_event(event),
            Classifier::Eafh(c) => c.on_link_event(event),
        }
    }

    /// Poll for a new used-channel list.
    pub fn tick(&mut self, now: Timestamp) -> Option<ChannelMap> {
        match self {
            Classifier::Per(c) => c.tick(now),
            Classifier::Eafh(c) => c.tick(now),
        }
    }

    /// Period of the externally scheduled classification callback, when the
    /// variant uses one. The enhanced classifier is driven by connection
    /// events instead.
    pub fn tick_period(&self) -> Option<Duration> {
        match self {
            Classifier::Per(c) => Some(c.classify_every()),
            Classifier::Eafh(_) => None,
        }
    }
}
