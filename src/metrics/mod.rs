//! Runtime-wide metrics: atomic counters exposed for structured logging,
//! following the same "log the event now, wire up a real sink later" shape
//! as a typical metrics logger.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;
use uuid::Uuid;

/// Counters tracked for the lifetime of the process. Cheap to share: every
/// field is a lock-free atomic, cloned behind an `Arc` by the caller.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    switches_issued: AtomicU64,
    switches_late: AtomicU64,
    preload_failures: AtomicU64,
    dropped_chunks: AtomicU64,
    sessions_started: AtomicU64,
    sessions_terminal: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_switch_issued(&self, channel_id: Uuid, boundary_ms: i64) {
        self.switches_issued.fetch_add(1, Ordering::Relaxed);
        info!(%channel_id, boundary_ms, "switch issued");
    }

    pub fn record_switch_late(&self, channel_id: Uuid, lateness_ms: i64) {
        self.switches_late.fetch_add(1, Ordering::Relaxed);
        info!(%channel_id, lateness_ms, "switch issuance was late");
    }

    pub fn record_preload_failure(&self, channel_id: Uuid, reason: &str) {
        self.preload_failures.fetch_add(1, Ordering::Relaxed);
        info!(%channel_id, reason, "preload failed");
    }

    pub fn record_dropped_chunks(&self, channel_id: Uuid, subscriber_id: Uuid, count: u64) {
        self.dropped_chunks.fetch_add(count, Ordering::Relaxed);
        info!(%channel_id, %subscriber_id, count, "chunks dropped for slow subscriber");
    }

    pub fn record_session_started(&self, channel_id: Uuid) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        info!(%channel_id, "session started");
    }

    pub fn record_session_terminal(&self, channel_id: Uuid, reason: &str) {
        self.sessions_terminal.fetch_add(1, Ordering::Relaxed);
        info!(%channel_id, reason, "session entered terminal state");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            switches_issued: self.switches_issued.load(Ordering::Relaxed),
            switches_late: self.switches_late.load(Ordering::Relaxed),
            preload_failures: self.preload_failures.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_terminal: self.sessions_terminal.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time read of [`RuntimeMetrics`], serializable for the HTTP
/// status surface.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub switches_issued: u64,
    pub switches_late: u64,
    pub preload_failures: u64,
    pub dropped_chunks: u64,
    pub sessions_started: u64,
    pub sessions_terminal: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_calls() {
        let metrics = RuntimeMetrics::new();
        let channel_id = Uuid::new_v4();
        metrics.record_switch_issued(channel_id, 1000);
        metrics.record_switch_issued(channel_id, 2000);
        metrics.record_switch_late(channel_id, 50);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.switches_issued, 2);
        assert_eq!(snapshot.switches_late, 1);
    }

    #[test]
    fn dropped_chunks_accumulates_by_count() {
        let metrics = RuntimeMetrics::new();
        let channel_id = Uuid::new_v4();
        let subscriber_id = Uuid::new_v4();
        metrics.record_dropped_chunks(channel_id, subscriber_id, 3);
        metrics.record_dropped_chunks(channel_id, subscriber_id, 2);
        assert_eq!(metrics.snapshot().dropped_chunks, 5);
    }
}
