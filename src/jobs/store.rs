use super::model::{Job, JobId, JobResult, JobStatus, Lease};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Failures of job-store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No job with this id.
    #[error("job {0} not found")]
    NotFound(JobId),
    /// The job was not in the state the operation requires.
    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        /// Job concerned.
        job_id: JobId,
        /// Required state.
        expected: JobStatus,
        /// Observed state.
        actual: JobStatus,
    },
    /// The lease was superseded by a later attempt.
    #[error("lease on job {job_id} (attempt {attempt}) is no longer current")]
    LeaseLost {
        /// Job concerned.
        job_id: JobId,
        /// Attempt the stale lease was issued for.
        attempt: u32,
    },
}

/// Keyed job storage. Every state change is a compare-and-set on the stored status (and, for
/// leased jobs, on the attempt number).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new job.
    async fn insert(&self, job: Job);
    /// Fetch a job.
    async fn get(&self, id: &JobId) -> Result<Job, StoreError>;
    /// Move a `queued` job to `running` and issue a lease for the next attempt.
    async fn set_running(&self, id: &JobId) -> Result<Lease, StoreError>;
    /// Record progress on a leased job.
    async fn heartbeat(&self, lease: &Lease) -> Result<(), StoreError>;
    /// Move a leased job to `complete`.
    async fn set_complete(&self, lease: &Lease, result: JobResult) -> Result<(), StoreError>;
    /// Move a leased job to `failed`.
    async fn set_failed(&self, lease: &Lease, error: String) -> Result<(), StoreError>;
    /// Return `running` jobs without progress for `visibility_timeout` to `queued`.
    async fn requeue_stale(&self, now: OffsetDateTime, visibility_timeout: Duration) -> Vec<JobId>;
    /// Drop terminal jobs last updated more than `retention` ago.
    async fn purge_terminal(&self, now: OffsetDateTime, retention: Duration) -> usize;
}

/// Process-local [`JobStore`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether the store holds no jobs.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn finish(
        &self,
        lease: &Lease,
        apply: impl FnOnce(&mut Job) + Send,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = leased_job(&mut jobs, lease)?;
        apply(job);
        job.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

fn leased_job<'a>(
    jobs: &'a mut HashMap<JobId, Job>,
    lease: &Lease,
) -> Result<&'a mut Job, StoreError> {
    let job = jobs
        .get_mut(&lease.job_id)
        .ok_or_else(|| StoreError::NotFound(lease.job_id.clone()))?;
    if job.attempt != lease.attempt {
        return Err(StoreError::LeaseLost {
            job_id: lease.job_id.clone(),
            attempt: lease.attempt,
        });
    }
    if job.status != JobStatus::Running {
        return Err(StoreError::Conflict {
            job_id: lease.job_id.clone(),
            expected: JobStatus::Running,
            actual: job.status,
        });
    }
    Ok(job)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    async fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn set_running(&self, id: &JobId) -> Result<Lease, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if job.status != JobStatus::Queued {
            return Err(StoreError::Conflict {
                job_id: id.clone(),
                expected: JobStatus::Queued,
                actual: job.status,
            });
        }
        job.status = JobStatus::Running;
        job.attempt += 1;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(Lease {
            job_id: id.clone(),
            attempt: job.attempt,
        })
    }

    async fn heartbeat(&self, lease: &Lease) -> Result<(), StoreError> {
        self.finish(lease, |_| {}).await
    }

    async fn set_complete(&self, lease: &Lease, result: JobResult) -> Result<(), StoreError> {
        self.finish(lease, |job| {
            job.status = JobStatus::Complete;
            job.result = Some(result);
        })
        .await
    }

    async fn set_failed(&self, lease: &Lease, error: String) -> Result<(), StoreError> {
        self.finish(lease, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
        })
        .await
    }

    async fn requeue_stale(&self, now: OffsetDateTime, visibility_timeout: Duration) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let mut requeued = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running && now - job.updated_at > visibility_timeout {
                job.status = JobStatus::Queued;
                job.updated_at = now;
                requeued.push(job.id.clone());
            }
        }
        requeued.sort();
        requeued
    }

    async fn purge_terminal(&self, now: OffsetDateTime, retention: Duration) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && now - job.updated_at > retention));
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobInput;

    fn result() -> JobResult {
        JobResult {
            answer: "ok".into(),
            verified: true,
            unverified_reason: None,
            rounds: 1,
            pii_restored: false,
        }
    }

    async fn store_with_job() -> (InMemoryJobStore, JobId) {
        let store = InMemoryJobStore::new();
        let job = Job::new(JobInput::new("q"));
        let id = job.id.clone();
        store.insert(job).await;
        (store, id)
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (store, id) = store_with_job().await;
        let lease = store.set_running(&id).await.expect("first claim");
        assert_eq!(lease.attempt, 1);
        let second = store.set_running(&id).await.expect_err("already running");
        assert_eq!(
            second,
            StoreError::Conflict {
                job_id: id.clone(),
                expected: JobStatus::Queued,
                actual: JobStatus::Running,
            }
        );
    }

    #[tokio::test]
    async fn terminal_states_are_final() {
        let (store, id) = store_with_job().await;
        let lease = store.set_running(&id).await.expect("claim");
        store.set_complete(&lease, result()).await.expect("complete");
        assert!(store.set_failed(&lease, "late".into()).await.is_err());
        let job = store.get(&id).await.expect("job");
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, Some(result()));
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn stale_jobs_are_requeued_and_old_leases_rejected() {
        let (store, id) = store_with_job().await;
        let stale = store.set_running(&id).await.expect("claim");

        let later = OffsetDateTime::now_utc() + Duration::from_secs(601);
        let requeued = store.requeue_stale(later, Duration::from_secs(600)).await;
        assert_eq!(requeued, vec![id.clone()]);
        assert_eq!(store.get(&id).await.expect("job").status, JobStatus::Queued);

        let fresh = store.set_running(&id).await.expect("reclaim");
        assert_eq!(fresh.attempt, 2);
        assert_eq!(
            store.set_complete(&stale, result()).await,
            Err(StoreError::LeaseLost {
                job_id: id.clone(),
                attempt: 1
            })
        );
        store.set_complete(&fresh, result()).await.expect("current lease");
    }

    #[tokio::test]
    async fn fresh_running_jobs_are_left_alone() {
        let (store, id) = store_with_job().await;
        let lease = store.set_running(&id).await.expect("claim");
        store.heartbeat(&lease).await.expect("heartbeat");
        let now = OffsetDateTime::now_utc();
        assert!(store.requeue_stale(now, Duration::from_secs(600)).await.is_empty());
    }

    #[tokio::test]
    async fn purge_only_removes_old_terminal_jobs() {
        let (store, done) = store_with_job().await;
        let lease = store.set_running(&done).await.expect("claim");
        store.set_failed(&lease, "boom".into()).await.expect("fail");
        store.insert(Job::new(JobInput::new("pending"))).await;

        let now = OffsetDateTime::now_utc();
        assert_eq!(store.purge_terminal(now, Duration::from_secs(3600)).await, 0);
        let later = now + Duration::from_secs(3601);
        assert_eq!(store.purge_terminal(later, Duration::from_secs(3600)).await, 1);
        assert_eq!(store.len().await, 1);
        assert!(matches!(store.get(&done).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::from("missing");
        assert_eq!(store.get(&id).await.err(), Some(StoreError::NotFound(id)));
    }
}
