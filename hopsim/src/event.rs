//! Event types and priority queue for the discrete event simulation.

use std::cmp::Ordering;

use hoplink::{Duration, RxFrame, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Ordering rank for events sharing a timestamp: PHY deliveries reach a
/// receiver before its FSM step, classifier callbacks run before LL FSMs,
/// and scenario actions go last. Within one class, FIFO by insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventClass {
    PhyDelivery = 0,
    ClassifierTick = 1,
    NodeRun = 2,
    Scenario = 3,
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Corrupt every frame on the given channels from now on.
    JamChannels { channels: Vec<u8> },
    /// Stop all synthetic interference.
    ClearJamming,
    /// Inject one application payload on a node's connection.
    InjectPayload {
        node: usize,
        conn: usize,
        payload: Vec<u8>,
    },
    /// Opaque tagged hook from the scenario surface; recorded in metrics.
    Tagged { tag: String },
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame starts arriving at an endpoint.
    RxStart {
        node: usize,
        conn: usize,
        channel: u8,
        access_address: u32,
    },
    /// A frame finishes arriving at an endpoint.
    RxEnd {
        node: usize,
        conn: usize,
        rx: RxFrame,
    },
    /// Run a node's orchestrator step. Stale entries (superseded by an
    /// earlier reschedule) carry an old `seq` and are skipped.
    NodeRun { node: usize, seq: u64 },
    /// Periodic classification callback for a node.
    ClassifierTick { node: usize },
    /// Execute a scenario action; periodic actions are reinserted at
    /// `time + every` after each firing.
    Action {
        action: ScenarioAction,
        every: Option<Duration>,
    },
}

impl Event {
    pub fn class(&self) -> EventClass {
        match self {
            Event::RxStart { .. } | Event::RxEnd { .. } => EventClass::PhyDelivery,
            Event::ClassifierTick { .. } => EventClass::ClassifierTick,
            Event::NodeRun { .. } => EventClass::NodeRun,
            Event::Action { .. } => EventClass::Scenario,
        }
    }
}

/// A scheduled event with timestamp, class, and sequence number.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Same-timestamp ordering class.
    pub class: EventClass,
    /// Sequence number for FIFO ordering within a class.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        let class = event.class();
        Self {
            time,
            class,
            seq,
            event,
        }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.class == other.class && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap: earliest (time, class, seq) wins.
        match other.time.cmp(&self.time) {
            Ordering::Equal => match other.class.cmp(&self.class) {
                Ordering::Equal => other.seq.cmp(&self.seq),
                ord => ord,
            },
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_event(time_us: u64, seq: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            Timestamp::from_micros(time_us),
            SequenceNumber::new(seq),
            Event::NodeRun { node: 0, seq: 0 },
        )
    }

    #[test]
    fn test_earlier_time_wins() {
        let e1 = run_event(10, 1);
        let e2 = run_event(5, 2);
        // e2 has the earlier time, so it is "greater" in min-heap terms.
        assert!(e2 > e1);
    }

    #[test]
    fn test_same_time_fifo_by_sequence() {
        let e1 = run_event(10, 1);
        let e2 = run_event(10, 2);
        assert!(e1 > e2);
    }

    #[test]
    fn test_same_time_delivery_before_node_run() {
        let delivery = ScheduledEvent::new(
            Timestamp::from_micros(10),
            SequenceNumber::new(5),
            Event::RxStart {
                node: 0,
                conn: 0,
                channel: 3,
                access_address: 0x487647F2,
            },
        );
        let run = run_event(10, 1);
        // Despite the larger sequence number, the PHY delivery comes first.
        assert!(delivery > run);
    }

    #[test]
    fn test_heap_pops_in_order() {
        let mut heap = std::collections::BinaryHeap::new();
        heap.push(run_event(30, 0));
        heap.push(run_event(10, 1));
        heap.push(run_event(20, 2));

        let mut last = Timestamp::ZERO;
        while let Some(ev) = heap.pop() {
            assert!(ev.time >= last, "popped timestamps must be non-decreasing");
            last = ev.time;
        }
    }
}
