//! Query encoders used by retrieval: dense embeddings and sparse term weights.

mod sparse;

pub use sparse::{SparseEncoder, SparseVector};

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic offline embedding client that hashes tokens into a fixed number of buckets.
pub struct HashingEmbeddingClient {
    dimension: usize,
}

impl HashingEmbeddingClient {
    /// Construct an encoder producing vectors of `dimension` entries.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for token in sparse::tokenize(text) {
            let hash = sparse::token_hash(&token);
            let position = (hash as usize) % dimension;
            // High bit picks the sign so unrelated tokens partially cancel.
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            embedding[position] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}

/// Embedding client calling Ollama's `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingClient {
    /// Build a client for `model` served at `base_url`, expecting `dimension`-wide vectors.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("synapse/embedding")
            .build()
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let expected = texts.len();
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| EmbeddingClientError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Ollama returned {status}: {body}");
            return Err(if status.is_server_error() {
                EmbeddingClientError::Unavailable(message)
            } else {
                EmbeddingClientError::GenerationFailed(message)
            });
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;

        if body.embeddings.len() != expected {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "expected {expected} embeddings, received {}",
                body.embeddings.len()
            )));
        }
        if let Some(vector) = body
            .embeddings
            .iter()
            .find(|vector| vector.len() != self.dimension)
        {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "expected dimension {}, received {}",
                self.dimension,
                vector.len()
            )));
        }

        Ok(body.embeddings)
    }
}

/// Build an embedding client suitable for the supplied configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Selecting embedding client"
    );
    Ok(match config.embedding_provider {
        EmbeddingProvider::Ollama => Box::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )?),
        EmbeddingProvider::Hashing => {
            Box::new(HashingEmbeddingClient::new(config.embedding_dimension))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn hashing_vectors_are_normalised_and_stable() {
        let client = HashingEmbeddingClient::new(64);
        let vectors = client
            .generate_embeddings(vec!["lithium dosage".into(), "lithium dosage".into()])
            .await
            .expect("vectors");
        assert_eq!(vectors[0], vectors[1]);
        let norm: f32 = vectors[0].iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_rejects_empty_input() {
        let client = HashingEmbeddingClient::new(8);
        assert!(client.generate_embeddings(Vec::new()).await.is_err());
        assert!(
            HashingEmbeddingClient::new(0)
                .generate_embeddings(vec!["x".into()])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn ollama_client_checks_dimension() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body_partial(r#"{"model":"nomic-embed-text"}"#);
                then.status(200)
                    .json_body(json!({ "embeddings": [[0.1, 0.2, 0.3]] }));
            })
            .await;

        let ok = OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text", 3)
            .expect("client")
            .generate_embeddings(vec!["query".into()])
            .await
            .expect("embedding");
        assert_eq!(ok, vec![vec![0.1, 0.2, 0.3]]);

        let mismatch = OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text", 4)
            .expect("client")
            .generate_embeddings(vec!["query".into()])
            .await;
        assert!(matches!(
            mismatch,
            Err(EmbeddingClientError::GenerationFailed(message)) if message.contains("dimension")
        ));
        mock.assert_hits_async(2).await;
    }
}
