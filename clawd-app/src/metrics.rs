use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-process counters surfaced on `/status`.
#[derive(Default)]
pub struct DaemonMetrics {
    agents_connected: AtomicU64,
    agents_disconnected: AtomicU64,
    tasks_enqueued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_skipped: AtomicU64,
    heartbeat_failures: AtomicU64,
    calls_proxied: AtomicU64,
}

impl DaemonMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_agents_connected(&self) {
        self.agents_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agents_disconnected(&self) {
        self.agents_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeats_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeats_skipped(&self) {
        self.heartbeats_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeat_failures(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_calls_proxied(&self) {
        self.calls_proxied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            agents_connected: self.agents_connected.load(Ordering::Relaxed),
            agents_disconnected: self.agents_disconnected.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeats_skipped: self.heartbeats_skipped.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            calls_proxied: self.calls_proxied.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub agents_connected: u64,
    pub agents_disconnected: u64,
    pub tasks_enqueued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_skipped: u64,
    pub heartbeat_failures: u64,
    pub calls_proxied: u64,
}

impl MetricsSnapshot {
    pub fn task_success_rate(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            return 1.0;
        }
        self.tasks_completed as f64 / finished as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = DaemonMetrics::new();
        metrics.inc_tasks_completed();
        metrics.inc_tasks_completed();
        metrics.inc_tasks_completed();
        metrics.inc_tasks_failed();
        metrics.inc_heartbeats_skipped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_completed, 3);
        assert_eq!(snapshot.heartbeats_skipped, 1);
        assert_eq!(snapshot.task_success_rate(), 0.75);
    }

    #[test]
    fn test_success_rate_without_tasks() {
        assert_eq!(DaemonMetrics::default().snapshot().task_success_rate(), 1.0);
    }
}
