use super::model::{Job, JobId, JobInput, Lease};
use super::store::JobStore;
use crate::metrics::JobMetrics;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};

/// FIFO of job ids backed by a [`JobStore`].
///
/// Delivery is at-least-once: an id may be popped more than once (after a requeue or a
/// duplicate push), but only the pop that wins the store's `queued -> running` compare-and-set
/// gets a lease.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    pending: Mutex<VecDeque<JobId>>,
    notify: Notify,
    metrics: Arc<JobMetrics>,
}

impl JobQueue {
    /// Queue over `store`, counting into `metrics`.
    pub fn new(store: Arc<dyn JobStore>, metrics: Arc<JobMetrics>) -> Self {
        Self {
            store,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            metrics,
        }
    }

    /// Store the job as `queued` and make it visible to workers.
    pub async fn enqueue(&self, input: JobInput) -> JobId {
        let job = Job::new(input);
        let id = job.id.clone();
        self.store.insert(job).await;
        self.push(id.clone()).await;
        self.metrics.record_enqueued();
        tracing::debug!(job_id = %id, "Job enqueued");
        id
    }

    /// Make an existing id visible again. Claiming still requires the job to be `queued`.
    pub async fn redeliver(&self, id: JobId) {
        self.push(id).await;
    }

    /// Wait for the next claimable job and lease it.
    pub async fn dequeue(&self) -> Lease {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the await is not lost.
            notified.as_mut().enable();
            if let Some(lease) = self.try_dequeue().await {
                return lease;
            }
            notified.await;
        }
    }

    /// Lease the next claimable job without waiting.
    ///
    /// The id stays at the head of the queue until the claim resolves, so a caller dropped
    /// mid-claim leaves it deliverable.
    pub async fn try_dequeue(&self) -> Option<Lease> {
        let mut pending = self.pending.lock().await;
        loop {
            let id = pending.front()?.clone();
            let claim = self.store.set_running(&id).await;
            pending.pop_front();
            match claim {
                Ok(lease) => return Some(lease),
                Err(error) => {
                    tracing::debug!(job_id = %id, error = %error, "Skipping unclaimable delivery");
                }
            }
        }
    }

    /// Requeue stale `running` jobs and push them back for delivery.
    pub async fn sweep(&self, now: OffsetDateTime, visibility_timeout: Duration) -> usize {
        let stale = self.store.requeue_stale(now, visibility_timeout).await;
        let count = stale.len();
        for id in stale {
            tracing::warn!(job_id = %id, "Requeued job after visibility timeout");
            self.push(id).await;
        }
        if count > 0 {
            self.metrics.record_requeued(count as u64);
        }
        count
    }

    /// Ids waiting for delivery.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether no id is waiting.
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    async fn push(&self, id: JobId) {
        self.pending.lock().await.push_back(id);
        self.notify.notify_one();
    }
}
