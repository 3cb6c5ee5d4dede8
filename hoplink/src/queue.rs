//! Bounded per-connection transmit queue.

use std::collections::VecDeque;

use crate::time::Timestamp;
use crate::types::DEFAULT_QUEUE_CAPACITY;

/// An application payload waiting for a connection event, together with the
/// timestamp the traffic source produced it (the latency reference point).
#[derive(Clone, Debug)]
pub struct QueuedPayload {
    pub payload: Vec<u8>,
    pub timestamp: Timestamp,
}

/// Bounded FIFO of application payloads, owned by a single connection.
///
/// `enqueue` refuses new payloads when full; the caller counts the overflow
/// in the connection statistics.
#[derive(Debug)]
pub struct TxQueue {
    inner: VecDeque<QueuedPayload>,
    capacity: usize,
}

impl TxQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a payload. Returns false (and drops the payload) when full.
    pub fn enqueue(&mut self, payload: Vec<u8>, timestamp: Timestamp) -> bool {
        if self.inner.len() >= self.capacity {
            return false;
        }
        self.inner.push_back(QueuedPayload { payload, timestamp });
        true
    }

    /// Pop the oldest payload.
    pub fn dequeue(&mut self) -> Option<QueuedPayload> {
        self.inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = TxQueue::new();
        assert!(q.enqueue(vec![1], Timestamp::from_micros(10)));
        assert!(q.enqueue(vec![2], Timestamp::from_micros(20)));

        let first = q.dequeue().unwrap();
        assert_eq!(first.payload, vec![1]);
        assert_eq!(first.timestamp.as_micros(), 10);
        assert_eq!(q.dequeue().unwrap().payload, vec![2]);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_enqueue_fails_when_full() {
        let mut q = TxQueue::with_capacity(2);
        assert!(q.enqueue(vec![0], Timestamp::ZERO));
        assert!(q.enqueue(vec![1], Timestamp::ZERO));
        assert!(!q.enqueue(vec![2], Timestamp::ZERO));
        assert_eq!(q.len(), 2);

        // Draining one slot makes room again.
        q.dequeue();
        assert!(q.enqueue(vec![3], Timestamp::ZERO));
    }
}
