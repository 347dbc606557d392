//! Intent routing and direct chat replies.
//!
//! Both paths only ever send masked text to the model.

use crate::llm::{LanguageModel, LlmError, RetryPolicy};
use crate::pii::{PiiError, PiiGate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ROUTER_PROMPT: &str = "You are a routing agent for a medical records assistant. Classify the \
user message into exactly one category:\n\
RAG - it asks about patients, documents, records, medication, results or any medical fact.\n\
CHAT - greetings, thanks or small talk.\n\
Reply with the category name only.";

const CHAT_PROMPT: &str = "You are a friendly assistant for a medical records service. Reply briefly. \
Tokens such as <PERSON_1> stand for redacted personal data; keep them as written.";

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End user.
    User,
    /// Assistant reply.
    Assistant,
}

/// One chat message as submitted by a client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: ChatRole,
    /// Raw text.
    pub content: String,
}

impl std::fmt::Debug for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatMessage")
            .field("role", &self.role)
            .field("content", &format_args!("<{} chars>", self.content.chars().count()))
            .finish()
    }
}

/// Where a message is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    /// Needs document retrieval and the agent loop.
    Rag,
    /// Answered directly.
    Chat,
}

/// Failures of a direct chat reply.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Masking refused the message.
    #[error(transparent)]
    Pii(#[from] PiiError),
    /// The model failed after retries.
    #[error(transparent)]
    Model(#[from] LlmError),
}

/// Classify an already-masked message. Model failures fall back to [`Intent::Rag`].
pub async fn classify_intent(
    llm: &dyn LanguageModel,
    retry: &RetryPolicy,
    masked_query: &str,
) -> Intent {
    let prompt = format!("{ROUTER_PROMPT}\n\nMessage: {masked_query}\nCategory:");
    match retry.run(|| llm.generate(&prompt)).await {
        Ok(reply) => parse_intent(&reply),
        Err(error) => {
            tracing::warn!(error = %error, "Intent classification failed; defaulting to RAG");
            Intent::Rag
        }
    }
}

fn parse_intent(reply: &str) -> Intent {
    let says_rag = reply
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case("RAG"));
    if says_rag {
        Intent::Rag
    } else {
        Intent::Chat
    }
}

/// Answer `message` directly. The message is masked before the call; placeholders in the reply
/// are restored only when `restore` is set.
pub async fn direct_reply(
    llm: &dyn LanguageModel,
    retry: &RetryPolicy,
    gate: &PiiGate,
    message: &str,
    restore: bool,
) -> Result<String, ChatError> {
    let (masked, entities) = gate.mask(message)?;
    let prompt = format!("{CHAT_PROMPT}\n\nUser: {masked}\nAssistant:");
    let reply = retry.run(|| llm.generate(&prompt)).await?;
    if restore && !entities.is_empty() {
        tracing::info!(
            target: crate::logging::AUDIT_TARGET,
            entities = entities.len(),
            "PII restored in chat reply"
        );
        Ok(PiiGate::unmask(&reply, &entities))
    } else {
        Ok(reply)
    }
}
