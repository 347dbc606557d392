//! Ollama-backed [`LanguageModel`] issuing non-streaming `/api/generate` requests.

use super::{LanguageModel, LlmError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for a local or remote Ollama runtime.
pub struct OllamaLanguageModel {
    http: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

impl OllamaLanguageModel {
    /// Build a client for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent("synapse/llm")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| LlmError::Fatal(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            // Low temperature keeps agent turns close to the retrieved context.
            temperature: 0.1,
        })
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LanguageModel for OllamaLanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_builder() {
                    LlmError::Fatal(format!("invalid request: {error}"))
                } else {
                    LlmError::Transient(format!(
                        "failed to reach Ollama at {}: {error}",
                        self.base_url
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Ollama returned {status}: {body}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    LlmError::Transient(message)
                } else {
                    LlmError::Fatal(message)
                },
            );
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Transient(format!("Ollama response timed out: {error}"))
            } else {
                LlmError::Fatal(format!("failed to decode Ollama response: {error}"))
            }
        })?;

        if !body.done {
            return Err(LlmError::Fatal(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        tracing::debug!(model = %self.model, chars = body.response.len(), "Model call completed");
        Ok(body.response.trim().to_string())
    }
}
