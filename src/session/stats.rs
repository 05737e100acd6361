//! Lock-free link statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated from the receive and transmit paths.
#[derive(Debug, Default)]
pub struct LinkStats {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
    reconnects: AtomicU64,
}

impl LinkStats {
    /// Record a received packet with `bytes` of payload.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a transmitted packet of `bytes` on the wire.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a protocol, access or socket error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet dropped before transmission.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a receive or request timeout.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scheduled reconnect task.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Packets handed to the dispatcher.
    pub rx_packets: u64,
    /// Packets written to the socket.
    pub tx_packets: u64,
    /// Payload bytes received.
    pub rx_bytes: u64,
    /// Bytes written to the socket.
    pub tx_bytes: u64,
    /// Errors of any kind.
    pub errors: u64,
    /// Packets dropped before transmission.
    pub dropped: u64,
    /// Receive and request timeouts.
    pub timeouts: u64,
    /// Reconnect tasks scheduled.
    pub reconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = LinkStats::default();
        stats.record_rx(16);
        stats.record_rx(0);
        stats.record_tx(44);
        stats.record_error();
        stats.record_drop();
        stats.record_timeout();

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 2);
        assert_eq!(snap.rx_bytes, 16);
        assert_eq!(snap.tx_packets, 1);
        assert_eq!(snap.tx_bytes, 44);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.reconnects, 0);
    }
}
