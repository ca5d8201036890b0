//! Mutex-guarded home for a connection's [`ConnectionMetrics`] snapshot.
//!
//! A dedicated, short-held lock: producers (transport workers) and readers
//! (redundancy manager, scheduler, sync checker) both just lock briefly to
//! read or mutate the snapshot, never holding it across I/O.

use parking_lot::Mutex;
use shared::ConnectionMetrics;

#[derive(Debug, Default)]
pub struct MetricsHandle {
    inner: Mutex<ConnectionMetrics>,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConnectionMetrics {
        *self.inner.lock()
    }

    pub fn update(&self, f: impl FnOnce(&mut ConnectionMetrics)) {
        f(&mut self.inner.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_visible_in_snapshot() {
        let handle = MetricsHandle::new();
        handle.update(|m| m.record_sent(128, 1));
        let snap = handle.snapshot();
        assert_eq!(snap.packets_sent, 1);
        assert_eq!(snap.bytes_sent, 128);
    }
}
