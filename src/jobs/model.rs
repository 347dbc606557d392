use crate::agents::UnverifiedReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state. Transitions only move forward, except the visibility sweep returning a stale
/// `running` job to `queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker.
    Queued,
    /// Leased by a worker.
    Running,
    /// Finished with a result.
    Complete,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Whether the job can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        })
    }
}

/// Raw job input. Holds unmasked user text, so it is never serialized or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct JobInput {
    /// The user's question as typed.
    pub query: String,
    /// Restrict retrieval to one document.
    pub document: Option<String>,
    /// Caller asked for PII to be restored in the answer.
    pub restore_pii: bool,
}

impl JobInput {
    /// Input for `query` with no document filter and masked output.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            document: None,
            restore_pii: false,
        }
    }
}

impl fmt::Debug for JobInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInput")
            .field("query", &format_args!("<{} chars>", self.query.chars().count()))
            .field("document", &self.document)
            .field("restore_pii", &self.restore_pii)
            .finish()
    }
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    /// Final answer, masked unless restoration was requested and permitted.
    pub answer: String,
    /// Whether the Critic approved the answer.
    pub verified: bool,
    /// Why the answer was forced out, when unverified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unverified_reason: Option<UnverifiedReason>,
    /// Rounds the agent loop used.
    pub rounds: u32,
    /// Whether placeholders were replaced with original values.
    pub pii_restored: bool,
}

/// Stored job record.
#[derive(Debug, Clone)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// Current state.
    pub status: JobStatus,
    /// Raw input.
    pub input: JobInput,
    /// Set once `complete`.
    pub result: Option<JobResult>,
    /// Set once `failed`.
    pub error: Option<String>,
    /// Number of times the job has been leased.
    pub attempt: u32,
    /// Creation time.
    pub created_at: OffsetDateTime,
    /// Last state change or heartbeat.
    pub updated_at: OffsetDateTime,
}

impl Job {
    /// New `queued` job with a fresh id.
    pub fn new(input: JobInput) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            input,
            result: None,
            error: None,
            attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Public view returned to pollers.
    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: format_timestamp(self.created_at),
            updated_at: format_timestamp(self.updated_at),
        }
    }
}

/// Poll response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    /// Identifier.
    pub job_id: JobId,
    /// Current state.
    pub status: JobStatus,
    /// Result when complete.
    pub result: Option<JobResult>,
    /// Error description when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last update.
    pub updated_at: String,
}

/// Proof that a worker holds a job. Completion only succeeds while the lease is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Leased job.
    pub job_id: JobId,
    /// Attempt number the lease was issued for.
    pub attempt: u32,
}

fn format_timestamp(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}
