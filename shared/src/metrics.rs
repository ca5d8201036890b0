//! Per-connection metrics snapshot.

/// Plain data snapshot of a connection's traffic and health counters.
///
/// This struct carries no synchronization of its own; `server::metrics`
/// guards it behind a `parking_lot::Mutex` so producers (transport workers)
/// and readers (the redundancy manager, the scheduler, the sync checker) can
/// update/read it without contending on the server mutex.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionMetrics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub failed_send_attempts: u32,
    pub average_rtt_millis: f64,
    /// Milliseconds since the Unix epoch, set by whoever last mutated this
    /// struct. Avoids depending on a clock type here so the struct stays a
    /// plain, `Copy`, test-friendly value.
    pub last_metrics_update: u64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, bytes: usize, now_millis: u64) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_metrics_update = now_millis;
    }

    pub fn record_received(&mut self, bytes: usize, now_millis: u64) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
        self.last_metrics_update = now_millis;
    }

    pub fn record_failed_send(&mut self) {
        self.failed_send_attempts += 1;
    }

    pub fn reset_failed_sends(&mut self) {
        self.failed_send_attempts = 0;
    }

    /// Reconnect becomes a candidate once failures exceed a small threshold.
    pub fn needs_reconnect(&self) -> bool {
        self.failed_send_attempts > 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_reconnect_threshold() {
        let mut m = ConnectionMetrics::new();
        for _ in 0..10 {
            m.record_failed_send();
        }
        assert!(!m.needs_reconnect());
        m.record_failed_send();
        assert!(m.needs_reconnect());
    }

    #[test]
    fn reset_clears_failures() {
        let mut m = ConnectionMetrics::new();
        m.record_failed_send();
        m.reset_failed_sends();
        assert_eq!(m.failed_send_attempts, 0);
    }
}
