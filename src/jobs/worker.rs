use super::model::Lease;
use super::queue::JobQueue;
use super::model::JobStatus;
use super::store::{JobStore, StoreError};
use crate::metrics::JobMetrics;
use crate::orchestrator::{Heartbeat, Orchestrator, OrchestratorError};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Worker pool tunables.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Concurrent workers (at least one).
    pub workers: usize,
    /// Wall-clock budget for each job.
    pub job_deadline: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
    /// Age after which a `running` job without progress is requeued.
    pub visibility_timeout: Duration,
    /// Age after which terminal jobs are purged.
    pub retention: Duration,
    /// How often a running job checks that its lease is still current.
    pub lease_check_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            job_deadline: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            visibility_timeout: Duration::from_secs(600),
            retention: Duration::from_secs(3600),
            lease_check_interval: Duration::from_secs(1),
        }
    }
}

/// Shared handles every worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    /// Queue workers pull from.
    pub queue: Arc<JobQueue>,
    /// Store holding job records.
    pub store: Arc<dyn JobStore>,
    /// Agent loop.
    pub orchestrator: Arc<Orchestrator>,
    /// Counters.
    pub metrics: Arc<JobMetrics>,
}

/// Fixed set of workers plus a sweeper, stopped together.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    size: usize,
}

impl WorkerPool {
    /// Spawn the workers and the sweeper on the current runtime.
    pub fn spawn(context: WorkerContext, settings: WorkerSettings) -> Self {
        let (shutdown, signal) = watch::channel(false);
        let size = settings.workers.max(1);

        let mut handles: Vec<JoinHandle<()>> = (0..size)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    context.clone(),
                    settings.clone(),
                    signal.clone(),
                ))
            })
            .collect();
        handles.push(tokio::spawn(sweeper_loop(
            context,
            settings.clone(),
            signal,
        )));

        tracing::info!(workers = size, "Worker pool started");
        Self {
            handles,
            shutdown,
            size,
        }
    }

    /// Number of job workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Signal every task to stop and wait for them. Jobs in flight finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(error) = result {
                tracing::error!(error = %error, "Worker task ended abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    context: WorkerContext,
    settings: WorkerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "Worker started");
    loop {
        let lease = tokio::select! {
            _ = shutdown.changed() => break,
            lease = context.queue.dequeue() => lease,
        };
        process_job(&context, lease, &settings).await;
        if *shutdown.borrow() {
            break;
        }
    }
    tracing::debug!(worker_id, "Worker stopped");
}

async fn sweeper_loop(
    context: WorkerContext,
    settings: WorkerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(settings.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let now = OffsetDateTime::now_utc();
                context.queue.sweep(now, settings.visibility_timeout).await;
                let purged = context.store.purge_terminal(now, settings.retention).await;
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired jobs");
                }
            }
        }
    }
}

/// Keeps a lease fresh while the agent loop makes progress.
struct LeaseHeartbeat {
    store: Arc<dyn JobStore>,
    lease: Lease,
}

#[async_trait]
impl Heartbeat for LeaseHeartbeat {
    async fn beat(&self, round: u32) -> Result<(), StoreError> {
        self.store.heartbeat(&self.lease).await.inspect_err(|error| {
            tracing::warn!(job_id = %self.lease.job_id, round, error = %error, "Heartbeat rejected");
        })
    }
}

/// Resolves once `lease` no longer owns its job: the job was requeued, re-claimed, finished by
/// someone else or purged.
async fn lease_revoked(store: &dyn JobStore, lease: &Lease, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.get(&lease.job_id).await {
            Ok(job) if job.status == JobStatus::Running && job.attempt == lease.attempt => {}
            _ => return,
        }
    }
}

/// Run one leased job to a terminal state.
///
/// A panic inside the agent loop leaves the job `running`; the visibility sweep requeues it.
/// When the lease is revoked mid-run the agent loop is aborted and the store is left to the
/// new owner.
pub async fn process_job(context: &WorkerContext, lease: Lease, settings: &WorkerSettings) {
    let job = match context.store.get(&lease.job_id).await {
        Ok(job) => job,
        Err(error) => {
            tracing::warn!(job_id = %lease.job_id, error = %error, "Leased job vanished");
            return;
        }
    };
    tracing::info!(job_id = %job.id, attempt = lease.attempt, "Processing job");

    let orchestrator = context.orchestrator.clone();
    let heartbeat = LeaseHeartbeat {
        store: context.store.clone(),
        lease: lease.clone(),
    };
    let deadline = tokio::time::Instant::now() + settings.job_deadline;
    let mut run = tokio::spawn(async move {
        orchestrator
            .run(&job.id, &job.input, deadline, &heartbeat)
            .await
    });

    let joined = tokio::select! {
        joined = &mut run => joined,
        () = lease_revoked(context.store.as_ref(), &lease, settings.lease_check_interval) => {
            run.abort();
            tracing::warn!(job_id = %lease.job_id, attempt = lease.attempt, "Lease revoked; abandoning run");
            return;
        }
    };

    let outcome = match joined {
        Ok(Err(OrchestratorError::LeaseLost(error))) => {
            tracing::warn!(job_id = %lease.job_id, error = %error, "Lease lost; abandoning run");
            return;
        }
        Ok(Ok(run)) => {
            let verified = run.verification.is_verified();
            context
                .store
                .set_complete(&lease, run.into_result())
                .await
                .map(|()| context.metrics.record_completed(verified))
        }
        Ok(Err(error)) => {
            tracing::warn!(job_id = %lease.job_id, error = %error, "Job failed");
            context
                .store
                .set_failed(&lease, error.to_string())
                .await
                .map(|()| context.metrics.record_failed())
        }
        Err(join_error) => {
            tracing::error!(
                job_id = %lease.job_id,
                error = %join_error,
                "Worker crashed; job left for the visibility sweep"
            );
            return;
        }
    };

    if let Err(error) = outcome {
        tracing::warn!(job_id = %lease.job_id, error = %error, "Result discarded; lease no longer current");
    }
}
