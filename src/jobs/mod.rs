//! Asynchronous job lifecycle: records, storage, delivery and the worker pool.
//!
//! A job is `queued` on submission, `running` while a worker holds its lease, and ends `complete`
//! or `failed`. Terminal states never change. A `running` job whose worker stops making progress
//! is returned to `queued` by the visibility sweep, and the stale worker's lease stops working.

mod model;
mod queue;
mod store;
mod worker;

pub use model::{Job, JobId, JobInput, JobResult, JobStatus, JobView, Lease};
pub use queue::JobQueue;
pub use store::{InMemoryJobStore, JobStore, StoreError};
pub use worker::{WorkerContext, WorkerPool, WorkerSettings, process_job};
