//! Per-connection counters and derived statistics.

use crate::time::Duration;

/// Counters accumulated over the life of a connection.
///
/// Protocol-level failures (CRC errors, duplicates, queue overflow) are
/// counted here and handled by the protocol's own retry machinery; they are
/// never surfaced as errors.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    /// Time spent radiating.
    pub tx_time: Duration,
    /// Time spent idling between packets (TIFS gaps).
    pub idle_time: Duration,
    /// Time spent listening.
    pub listen_time: Duration,
    /// Time spent asleep between events.
    pub sleep_time: Duration,

    /// Packets handed to the PHY.
    pub tx_packets: u64,
    /// Retransmissions of an unacknowledged payload.
    pub tx_retransmitted: u64,
    /// Data packets (non-empty, non-control).
    pub tx_data: u64,
    /// LL control packets.
    pub tx_control: u64,
    /// Empty PDUs.
    pub tx_empty: u64,
    /// In-flight payloads confirmed by the peer's NESN.
    pub acked_packets: u64,

    /// Valid receptions.
    pub rx_packets: u64,
    /// Receptions repeating an already-delivered sequence number.
    pub rx_duplicate: u64,
    /// Receptions discarded for CRC failure.
    pub rx_crc_failed: u64,
    /// LL control packets received.
    pub rx_control: u64,

    /// Frame bytes transmitted (including framing overhead).
    pub tx_bytes: u64,
    /// Payload bytes transmitted.
    pub tx_payload_bytes: u64,
    /// Frame bytes received.
    pub rx_bytes: u64,
    /// Payload bytes delivered upward.
    pub rx_payload_bytes: u64,

    /// Sum of per-packet delivery latency (source timestamp to delivery).
    pub total_latency: Duration,
    /// Packets contributing to `total_latency`.
    pub latency_samples: u64,
    /// Sum of round-trip times (transmit to acknowledgement).
    pub total_rtt: Duration,
    /// Packets contributing to `total_rtt`.
    pub rtt_samples: u64,

    /// Enqueue attempts rejected by a full transmit queue.
    pub queue_overflow: u64,
}

impl ConnectionStats {
    /// Fraction of data transmissions that were retransmissions.
    pub fn packet_loss_ratio(&self) -> f64 {
        if self.tx_data == 0 {
            return 0.0;
        }
        self.tx_retransmitted as f64 / self.tx_data as f64
    }

    /// Delivered payload throughput in kilobits per second over `elapsed`.
    pub fn throughput_kbps(&self, elapsed: Duration) -> f64 {
        if elapsed == Duration::ZERO {
            return 0.0;
        }
        (self.rx_payload_bytes as f64 * 8.0 / 1_000.0) / (elapsed.as_micros() as f64 / 1e6)
    }

    /// Mean source-to-delivery latency in seconds.
    pub fn avg_latency_secs(&self) -> f64 {
        if self.latency_samples == 0 {
            return 0.0;
        }
        self.total_latency.as_micros() as f64 / self.latency_samples as f64 / 1e6
    }

    /// Mean transmit-to-acknowledgement round trip in seconds.
    pub fn avg_rtt_secs(&self) -> f64 {
        if self.rtt_samples == 0 {
            return 0.0;
        }
        self.total_rtt.as_micros() as f64 / self.rtt_samples as f64 / 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_stats_empty() {
        let stats = ConnectionStats::default();
        assert_eq!(stats.packet_loss_ratio(), 0.0);
        assert_eq!(stats.throughput_kbps(Duration::from_secs(1)), 0.0);
        assert_eq!(stats.avg_latency_secs(), 0.0);
        assert_eq!(stats.avg_rtt_secs(), 0.0);
    }

    #[test]
    fn test_throughput() {
        let stats = ConnectionStats {
            rx_payload_bytes: 12_500, // 100 kbit
            ..Default::default()
        };
        let kbps = stats.throughput_kbps(Duration::from_secs(1));
        assert!((kbps - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_avg_latency() {
        let stats = ConnectionStats {
            total_latency: Duration::from_millis(30),
            latency_samples: 3,
            ..Default::default()
        };
        assert!((stats.avg_latency_secs() - 0.010).abs() < 1e-9);
    }

    #[test]
    fn test_packet_loss_ratio() {
        let stats = ConnectionStats {
            tx_data: 100,
            tx_retransmitted: 5,
            ..Default::default()
        };
        assert!((stats.packet_loss_ratio() - 0.05).abs() < 1e-12);
    }
}
