//! Application service behind the HTTP surface.

use crate::chat::{self, ChatError, ChatMessage, ChatRole, Intent};
use crate::jobs::{JobId, JobInput, JobQueue, JobStore, JobView, StoreError};
use crate::llm::{LanguageModel, LlmError, RetryPolicy};
use crate::metrics::{JobMetrics, MetricsSnapshot};
use crate::pii::{PiiError, PiiGate};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Notice returned while a RAG job is being processed.
pub const WORKING_NOTICE: &str =
    "Your question was handed to the research team. Poll the task for the verified answer.";

/// Errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request body is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Masking refused the input.
    #[error("PII policy violation: {0}")]
    PolicyViolation(#[from] PiiError),
    /// Unknown or expired job id.
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// The model failed while answering directly.
    #[error(transparent)]
    Model(#[from] LlmError),
    /// The job store rejected an operation.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => ServiceError::JobNotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

impl From<ChatError> for ServiceError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::Pii(error) => ServiceError::PolicyViolation(error),
            ChatError::Model(error) => ServiceError::Model(error),
        }
    }
}

/// A chat submission.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation so far; the last message must come from the user.
    pub messages: Vec<ChatMessage>,
    /// Restrict retrieval to one document.
    pub document: Option<String>,
    /// Ask for PII to be restored in the answer.
    pub restore_pii: bool,
}

/// Outcome of a chat submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    /// Always the assistant.
    pub role: ChatRole,
    /// Direct answer, or a notice that a job was queued.
    pub content: String,
    /// Routing decision.
    pub intent: Intent,
    /// Job to poll when the message was routed to the agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// Operations exposed over HTTP.
#[async_trait]
pub trait SynapseApi: Send + Sync {
    /// Route a chat message: answer directly or enqueue an agent job.
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ServiceError>;
    /// Current state of a job.
    async fn job_status(&self, id: &JobId) -> Result<JobView, ServiceError>;
    /// Counter snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
    /// Number of job workers.
    fn worker_count(&self) -> usize;
}

/// Production [`SynapseApi`].
pub struct SynapseService {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    gate: PiiGate,
    queue: Arc<JobQueue>,
    store: Arc<dyn JobStore>,
    metrics: Arc<JobMetrics>,
    restore_allowed: bool,
    workers: usize,
}

/// Dependencies of [`SynapseService`].
pub struct ServiceParts {
    /// Model used for routing and direct replies.
    pub llm: Arc<dyn LanguageModel>,
    /// Retry policy for those calls.
    pub retry: RetryPolicy,
    /// Masking gate.
    pub gate: PiiGate,
    /// Queue receiving RAG jobs.
    pub queue: Arc<JobQueue>,
    /// Store answering status polls.
    pub store: Arc<dyn JobStore>,
    /// Counters.
    pub metrics: Arc<JobMetrics>,
    /// Whether callers may opt into PII restoration.
    pub restore_allowed: bool,
    /// Size of the worker pool.
    pub workers: usize,
}

impl SynapseService {
    /// Assemble the service.
    pub fn new(parts: ServiceParts) -> Self {
        let ServiceParts {
            llm,
            retry,
            gate,
            queue,
            store,
            metrics,
            restore_allowed,
            workers,
        } = parts;
        Self {
            llm,
            retry,
            gate,
            queue,
            store,
            metrics,
            restore_allowed,
            workers,
        }
    }
}

#[async_trait]
impl SynapseApi for SynapseService {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ServiceError> {
        let last = request
            .messages
            .last()
            .ok_or_else(|| ServiceError::InvalidRequest("messages must not be empty".into()))?;
        if last.role != ChatRole::User {
            return Err(ServiceError::InvalidRequest(
                "the last message must come from the user".into(),
            ));
        }
        if last.content.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "the last message must not be empty".into(),
            ));
        }

        let (masked, _) = self.gate.mask(&last.content)?;
        let intent = chat::classify_intent(self.llm.as_ref(), &self.retry, &masked).await;
        tracing::info!(intent = ?intent, chars = last.content.chars().count(), "Chat message routed");

        match intent {
            Intent::Rag => {
                let job_id = self
                    .queue
                    .enqueue(JobInput {
                        query: last.content.clone(),
                        document: request.document,
                        restore_pii: request.restore_pii,
                    })
                    .await;
                Ok(ChatReply {
                    role: ChatRole::Assistant,
                    content: WORKING_NOTICE.to_string(),
                    intent,
                    job_id: Some(job_id),
                })
            }
            Intent::Chat => {
                let restore = request.restore_pii && self.restore_allowed;
                let content = chat::direct_reply(
                    self.llm.as_ref(),
                    &self.retry,
                    &self.gate,
                    &last.content,
                    restore,
                )
                .await?;
                self.metrics.record_chat_reply();
                Ok(ChatReply {
                    role: ChatRole::Assistant,
                    content,
                    intent,
                    job_id: None,
                })
            }
        }
    }

    async fn job_status(&self, id: &JobId) -> Result<JobView, ServiceError> {
        Ok(self.store.get(id).await?.view())
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn worker_count(&self) -> usize {
        self.workers
    }
}
