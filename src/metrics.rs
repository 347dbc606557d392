use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing job and chat activity.
#[derive(Default)]
pub struct JobMetrics {
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_unverified: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_requeued: AtomicU64,
    chat_replies: AtomicU64,
}

impl JobMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job accepted into the queue.
    pub fn record_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that reached `complete`; `verified` is false when the Admin forced the answer.
    pub fn record_completed(&self, verified: bool) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        if !verified {
            self.jobs_unverified.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a job that reached `failed`.
    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record stale jobs returned to the queue by the visibility sweep.
    pub fn record_requeued(&self, count: u64) {
        self.jobs_requeued.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a direct chat reply served without a job.
    pub fn record_chat_reply(&self) {
        self.chat_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_unverified: self.jobs_unverified.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            chat_replies: self.chat_replies.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Jobs accepted since startup.
    pub jobs_enqueued: u64,
    /// Jobs that reached `complete`, verified or not.
    pub jobs_completed: u64,
    /// Subset of completed jobs flagged unverified.
    pub jobs_unverified: u64,
    /// Jobs that reached `failed`.
    pub jobs_failed: u64,
    /// Stale jobs returned to the queue.
    pub jobs_requeued: u64,
    /// Chat-intent replies served directly.
    pub chat_replies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_job_outcomes() {
        let metrics = JobMetrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_completed(true);
        metrics.record_completed(false);
        metrics.record_failed();
        metrics.record_requeued(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_enqueued, 2);
        assert_eq!(snapshot.jobs_completed, 2);
        assert_eq!(snapshot.jobs_unverified, 1);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_requeued, 3);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(JobMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
