//! Language-model capability used by the agents and the chat router.
//!
//! The core only needs `generate(prompt) -> text`. Adapters classify failures as
//! [`LlmError::Transient`] (worth retrying) or [`LlmError::Fatal`] (the request itself is bad),
//! and [`RetryPolicy`] retries the former with capped exponential backoff.

mod ollama;
mod retry;

pub use ollama::OllamaLanguageModel;
pub use retry::{RetryPolicy, Retryable};

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by a language-model adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// Timeouts, connection failures, throttling and server errors.
    #[error("transient model failure: {0}")]
    Transient(String),
    /// Invalid requests and undecodable responses; retrying will not help.
    #[error("model rejected the request: {0}")]
    Fatal(String),
}

impl LlmError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

/// Text generation capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}
