//! Scheduler counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters, shared by the poll loop and every worker.
///
/// Counters are monotonic; delta calculation is the caller's responsibility.
#[derive(Debug, Default)]
pub struct SchedulerMetricsStorage {
    pub(crate) runs_dispatched: AtomicU64,
    pub(crate) runs_succeeded: AtomicU64,
    pub(crate) runs_failed: AtomicU64,
    pub(crate) runs_canceled: AtomicU64,
    pub(crate) ticks: AtomicU64,
}

impl SchedulerMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            runs_dispatched: self.runs_dispatched.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_canceled: self.runs_canceled.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SchedulerMetricsStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// `run_once` invocations started, including re-invocations of
    /// progressing runs.
    pub runs_dispatched: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_canceled: u64,
    pub ticks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let storage = SchedulerMetricsStorage::new();
        SchedulerMetricsStorage::incr(&storage.runs_dispatched);
        SchedulerMetricsStorage::incr(&storage.runs_dispatched);
        SchedulerMetricsStorage::incr(&storage.runs_failed);

        let snapshot = storage.snapshot();
        assert_eq!(snapshot.runs_dispatched, 2);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.runs_succeeded, 0);
    }
}
