//! Best-effort observability counters (§5: "explicitly decoupled from
//! correctness"). Nothing here participates in a transaction; a crash
//! between a Store write and a counter update just leaves the counter
//! stale until the next restart.

use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide counters shared between the Dispatcher, Sweeper, and Ager.
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_created: AtomicI64,
    tasks_done: AtomicI64,
    tasks_fail: AtomicI64,
    queue_depth: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_done(&self) {
        self.tasks_done.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_depth_inc(&self) {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_depth_dec(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_done: self.tasks_done.load(Ordering::Relaxed),
            tasks_fail: self.tasks_fail.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`Metrics`], cheap to serialize for `/metrics` or
/// a CLI summary.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub tasks_created: i64,
    pub tasks_done: i64,
    pub tasks_fail: i64,
    pub queue_depth: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_bumps_queue_depth() {
        let m = Metrics::new();
        m.task_created();
        m.task_created();
        let snap = m.snapshot();
        assert_eq!(snap.tasks_created, 2);
        assert_eq!(snap.queue_depth, 2);
    }

    #[test]
    fn done_decrements_queue_depth() {
        let m = Metrics::new();
        m.task_created();
        m.task_done();
        let snap = m.snapshot();
        assert_eq!(snap.tasks_done, 1);
        assert_eq!(snap.queue_depth, 0);
    }
}
