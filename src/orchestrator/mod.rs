//! Explicit state machine driving the Admin, Researcher and Critic over one job.
//!
//! Every model and retrieval call goes through this module: the raw query is masked once on entry,
//! retrieved context is masked into the same job-scoped entity map, and only masked text reaches
//! prompts, traces and the conversation log. The loop always ends: each Critic turn either
//! finalizes or consumes a round, and the job deadline forces finalization.

mod state;

pub use state::{Event, Phase, TransitionError};

use crate::agents::critic::{self, CRITIC_UNAVAILABLE, Verdict};
use crate::agents::{
    Conversation, Role, UnverifiedReason, Verification, admin, researcher,
};
use crate::config::Config;
use crate::jobs::{JobId, JobInput, JobResult, StoreError};
use crate::llm::{LanguageModel, LlmError, RetryPolicy};
use crate::logging::AUDIT_TARGET;
use crate::pii::{EntityMap, PiiError, PiiGate};
use crate::retrieval::{
    NO_CONTEXT, RetrievalError, Retriever, SearchMode, SearchRequest, format_context,
    search_with_timeout,
};
use crate::trace::{TraceEvent, TraceKind, TraceSink};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Progress callback invoked at the start of every agent turn and before finalizing.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    /// Signal that the job is still making progress in `round`. An error means the job is no
    /// longer owned by this run and the loop must stop.
    async fn beat(&self, round: u32) -> Result<(), StoreError>;
}

/// Heartbeat that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeartbeat;

#[async_trait]
impl Heartbeat for NoHeartbeat {
    async fn beat(&self, _round: u32) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Tunables for the agent loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum Critic reviews before the Admin forces an answer (at least 1).
    pub max_rounds: u32,
    /// Chunks retrieved per Researcher turn.
    pub top_k: usize,
    /// Retrieval strategy.
    pub search_mode: SearchMode,
    /// Upper bound on a single retrieval call.
    pub retrieval_timeout: Duration,
    /// Retry policy for transient model and retrieval failures.
    pub retry: RetryPolicy,
    /// Whether callers may opt into PII restoration.
    pub restore_allowed: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            top_k: 5,
            search_mode: SearchMode::Hybrid,
            retrieval_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            restore_allowed: false,
        }
    }
}

impl OrchestratorSettings {
    /// Settings derived from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_rounds: config.agent_max_rounds.max(1),
            top_k: config.retrieval_top_k,
            search_mode: config.retrieval_mode,
            retrieval_timeout: config.retrieval_timeout(),
            retry: RetryPolicy::new(
                config.llm_max_retries.saturating_add(1),
                Duration::from_millis(500),
            ),
            restore_allowed: config.pii_restore_allowed,
        }
    }
}

/// Reasons a job fails outright.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Masking could not guarantee that no PII leaves the gate.
    #[error("PII policy violation: {0}")]
    PolicyViolation(#[from] PiiError),
    /// Transient model failures outlasted the retry budget before any draft existed.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// The model refused the request in a way retrying cannot fix.
    #[error("model rejected the request: {0}")]
    ModelRejected(String),
    /// The deadline expired before any draft existed.
    #[error("job deadline expired before an answer was drafted")]
    DeadlineExceeded,
    /// Internal state-machine violation.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// The job was requeued and claimed by another worker while this run was in flight.
    #[error("job lease lost: {0}")]
    LeaseLost(StoreError),
    /// Finalization was reached without a draft.
    #[error("no draft available to finalize")]
    MissingDraft,
}

/// Outcome of one agent loop.
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Final answer; masked unless restoration was requested and permitted.
    pub answer: String,
    /// Whether the Critic approved.
    pub verification: Verification,
    /// Rounds used.
    pub rounds: u32,
    /// Whether placeholders were replaced with original values.
    pub pii_restored: bool,
    /// Masked turn log.
    pub conversation: Conversation,
}

impl AgentRun {
    /// Convert into the stored job result.
    pub fn into_result(self) -> JobResult {
        JobResult {
            answer: self.answer,
            verified: self.verification.is_verified(),
            unverified_reason: self.verification.reason(),
            rounds: self.rounds,
            pii_restored: self.pii_restored,
        }
    }
}

enum CallFailure {
    Deadline,
    Exhausted(String),
    Rejected(String),
}

/// Runs the Admin / Researcher / Critic loop for one job.
pub struct Orchestrator {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    trace: Arc<dyn TraceSink>,
    gate: PiiGate,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Assemble an orchestrator from its capabilities.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        trace: Arc<dyn TraceSink>,
        gate: PiiGate,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            trace,
            gate,
            settings,
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run the loop for `input` until an answer is released or the job fails.
    pub async fn run(
        &self,
        job_id: &JobId,
        input: &JobInput,
        deadline: Instant,
        heartbeat: &dyn Heartbeat,
    ) -> Result<AgentRun, OrchestratorError> {
        let mut entities = EntityMap::new();
        let masked_query = self.gate.mask_into(&input.query, &mut entities)?;
        let max_rounds = self.settings.max_rounds.max(1);

        let mut conversation = Conversation::new();
        let mut phase = Phase::Researching;
        let mut round = 1;
        let mut context: Option<String> = None;
        let mut draft: Option<String> = None;
        let mut feedback: Option<String> = None;
        let mut forced: Option<UnverifiedReason> = None;

        conversation.push(Role::Admin, admin::handoff(&masked_query), round);
        tracing::info!(job_id = %job_id, masked_entities = entities.len(), "Agent loop started");

        loop {
            if !matches!(phase, Phase::Finalizing | Phase::Done) && Instant::now() >= deadline {
                if draft.is_none() {
                    return Err(OrchestratorError::DeadlineExceeded);
                }
                forced = Some(UnverifiedReason::Deadline);
                phase = phase.next(Event::ForceFinalize)?;
                continue;
            }

            match phase {
                Phase::Researching | Phase::Revising => {
                    heartbeat
                        .beat(round)
                        .await
                        .map_err(OrchestratorError::LeaseLost)?;
                    if context.is_none() {
                        context = self
                            .gather_context(job_id, &masked_query, input, &mut entities, deadline)
                            .await?;
                    }
                    let excerpts = context.as_deref().unwrap_or(NO_CONTEXT);
                    let prompt = match (&feedback, &draft) {
                        (Some(reason), Some(previous)) => {
                            researcher::revision_prompt(&masked_query, excerpts, previous, reason)
                        }
                        _ => researcher::draft_prompt(&masked_query, excerpts),
                    };

                    match self.call_model(job_id, Role::Researcher, prompt, deadline).await {
                        Ok(text) => {
                            conversation.push(Role::Researcher, text.clone(), round);
                            draft = Some(text);
                            phase = phase.next(Event::DraftReady)?;
                        }
                        Err(failure) => {
                            forced = Some(unverified_or_fail(failure, draft.is_some())?);
                            phase = phase.next(Event::ForceFinalize)?;
                        }
                    }
                }
                Phase::Critiquing => {
                    heartbeat
                        .beat(round)
                        .await
                        .map_err(OrchestratorError::LeaseLost)?;
                    let current = draft.as_deref().ok_or(OrchestratorError::MissingDraft)?;
                    let prompt =
                        critic::review_prompt(current, context.as_deref().unwrap_or(NO_CONTEXT));

                    let verdict = match self.call_model(job_id, Role::Critic, prompt, deadline).await
                    {
                        Ok(reply) => {
                            conversation.push(Role::Critic, reply.clone(), round);
                            critic::parse_verdict(&reply)
                        }
                        Err(CallFailure::Exhausted(message)) => {
                            tracing::warn!(job_id = %job_id, round, error = %message, "Critic unavailable; requesting revision");
                            conversation.push(
                                Role::Admin,
                                format!("Critic unavailable in round {round}; treating the draft as unreviewed."),
                                round,
                            );
                            Verdict::Revise(CRITIC_UNAVAILABLE.to_string())
                        }
                        Err(failure) => {
                            forced = Some(unverified_or_fail(failure, true)?);
                            phase = phase.next(Event::ForceFinalize)?;
                            continue;
                        }
                    };

                    match verdict {
                        Verdict::Approve => {
                            tracing::debug!(job_id = %job_id, round, "Critic approved draft");
                            phase = phase.next(Event::Approved)?;
                        }
                        Verdict::Revise(_) if round >= max_rounds => {
                            tracing::info!(job_id = %job_id, round, "Round limit reached; releasing unverified answer");
                            forced = Some(UnverifiedReason::MaxRounds);
                            phase = phase.next(Event::ForceFinalize)?;
                        }
                        Verdict::Revise(reason) => {
                            tracing::debug!(job_id = %job_id, round, reason = %reason, "Critic requested revision");
                            round += 1;
                            feedback = Some(reason);
                            phase = phase.next(Event::RevisionRequested)?;
                        }
                    }
                }
                Phase::Finalizing | Phase::Done => break,
            }
        }

        heartbeat
            .beat(round)
            .await
            .map_err(OrchestratorError::LeaseLost)?;
        let final_draft = draft.ok_or(OrchestratorError::MissingDraft)?;
        let verification = forced.map_or(Verification::Verified, Verification::Unverified);
        conversation.push(Role::Admin, admin::closing_note(verification, round), round);
        phase.next(Event::Finalized)?;

        let pii_restored = input.restore_pii && self.settings.restore_allowed && !entities.is_empty();
        if input.restore_pii && !self.settings.restore_allowed {
            tracing::warn!(target: AUDIT_TARGET, job_id = %job_id, "PII restoration requested but disabled");
        }
        let answer = if pii_restored {
            tracing::info!(
                target: AUDIT_TARGET,
                job_id = %job_id,
                entities = entities.len(),
                "PII restored in final answer"
            );
            PiiGate::unmask(&final_draft, &entities)
        } else {
            final_draft
        };

        tracing::info!(
            job_id = %job_id,
            rounds = round,
            verified = verification.is_verified(),
            "Agent loop finished"
        );

        Ok(AgentRun {
            answer,
            verification,
            rounds: round,
            pii_restored,
            conversation,
        })
    }

    /// Retrieve and mask context, retrying transient failures within the job deadline.
    /// `Ok(None)` means retrieval failed and the round proceeds without excerpts; masking
    /// failures fail the job.
    async fn gather_context(
        &self,
        job_id: &JobId,
        masked_query: &str,
        input: &JobInput,
        entities: &mut EntityMap,
        deadline: Instant,
    ) -> Result<Option<String>, OrchestratorError> {
        let request = SearchRequest {
            query: masked_query.to_string(),
            k: self.settings.top_k,
            mode: self.settings.search_mode,
            source: input.document.clone(),
        };
        let started = Instant::now();
        let attempts = self.settings.retry.run(|| async {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout = self.settings.retrieval_timeout.min(remaining);
            search_with_timeout(self.retriever.as_ref(), &request, timeout).await
        });
        let outcome = match tokio::time::timeout_at(deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout(started.elapsed())),
        };
        match outcome {
            Ok(chunks) => {
                let masked = self.gate.mask_into(&format_context(&chunks), entities)?;
                self.trace.record(TraceEvent::new(
                    job_id,
                    Role::Researcher,
                    TraceKind::Retrieve,
                    masked_query,
                    masked.clone(),
                    true,
                    started.elapsed(),
                ));
                Ok(Some(masked))
            }
            Err(error) => {
                tracing::warn!(job_id = %job_id, error = %error, "Retrieval failed; continuing without context");
                self.trace.record(TraceEvent::new(
                    job_id,
                    Role::Researcher,
                    TraceKind::Retrieve,
                    masked_query,
                    error.to_string(),
                    false,
                    started.elapsed(),
                ));
                Ok(None)
            }
        }
    }

    async fn call_model(
        &self,
        job_id: &JobId,
        role: Role,
        prompt: String,
        deadline: Instant,
    ) -> Result<String, CallFailure> {
        let started = Instant::now();
        let attempts = self.settings.retry.run(|| self.llm.generate(&prompt));
        let (result, output, ok) = match tokio::time::timeout_at(deadline, attempts).await {
            Ok(Ok(text)) => {
                let output = text.clone();
                (Ok(text), output, true)
            }
            Ok(Err(LlmError::Transient(message))) => {
                (Err(CallFailure::Exhausted(message.clone())), message, false)
            }
            Ok(Err(LlmError::Fatal(message))) => {
                (Err(CallFailure::Rejected(message.clone())), message, false)
            }
            Err(_) => (
                Err(CallFailure::Deadline),
                "job deadline expired".to_string(),
                false,
            ),
        };
        self.trace.record(TraceEvent::new(
            job_id,
            role,
            TraceKind::Generate,
            prompt,
            output,
            ok,
            started.elapsed(),
        ));
        result
    }
}

/// Map a model failure to a forced-answer reason when a draft exists, or to a job failure.
fn unverified_or_fail(
    failure: CallFailure,
    have_draft: bool,
) -> Result<UnverifiedReason, OrchestratorError> {
    match failure {
        CallFailure::Rejected(message) => Err(OrchestratorError::ModelRejected(message)),
        CallFailure::Deadline if have_draft => Ok(UnverifiedReason::Deadline),
        CallFailure::Deadline => Err(OrchestratorError::DeadlineExceeded),
        CallFailure::Exhausted(_) if have_draft => Ok(UnverifiedReason::ModelUnavailable),
        CallFailure::Exhausted(message) => Err(OrchestratorError::ModelUnavailable(message)),
    }
}
