//! Retrieval capability: top-k document chunks for a query in dense, sparse or hybrid mode.

mod fusion;
mod qdrant;

pub use fusion::{FusionWeights, fuse};
pub use qdrant::QdrantRetriever;

use crate::embedding::EmbeddingClientError;
use crate::llm::Retryable;
use crate::qdrant::QdrantError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest excerpt of a single chunk handed to the agents.
pub const MAX_CHUNK_CHARS: usize = 2000;

/// Context string used when nothing relevant was found.
pub const NO_CONTEXT: &str = "No documents found.";

/// Retrieval strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Dense vector similarity only.
    Dense,
    /// Sparse lexical match only.
    Sparse,
    /// Both, merged by rank fusion.
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(Self::Dense),
            "sparse" | "lexical" => Ok(Self::Sparse),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(()),
        }
    }
}

/// One retrieved chunk. `score` is the ranking score for the requested mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Point identifier in the vector store.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Originating document, when known.
    pub source: Option<String>,
    /// Score used for ordering.
    pub score: f32,
    /// Raw dense similarity, when the chunk came back from the dense index.
    pub dense_score: Option<f32>,
    /// Raw sparse score, when the chunk came back from the sparse index.
    pub sparse_score: Option<f32>,
}

/// Parameters for one retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Query text (already masked).
    pub query: String,
    /// Number of chunks wanted.
    pub k: usize,
    /// Retrieval strategy.
    pub mode: SearchMode,
    /// Restrict results to a single document.
    pub source: Option<String>,
}

/// Failures surfaced by retrieval backends.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The call exceeded its deadline.
    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),
    /// Query encoding failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// The vector store rejected or failed the query.
    #[error(transparent)]
    Store(#[from] QdrantError),
}

impl Retryable for RetrievalError {
    fn is_transient(&self) -> bool {
        match self {
            RetrievalError::Timeout(_) => true,
            RetrievalError::Embedding(EmbeddingClientError::Unavailable(_)) => true,
            RetrievalError::Embedding(EmbeddingClientError::GenerationFailed(_)) => false,
            RetrievalError::Store(QdrantError::Http(_)) => true,
            RetrievalError::Store(QdrantError::UnexpectedStatus { status, .. }) => {
                status.is_server_error() || status.as_u16() == 429
            }
            RetrievalError::Store(QdrantError::InvalidUrl(_)) => false,
        }
    }
}

/// Top-k retrieval over the document collection.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `request.k` chunks ordered by descending relevance.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>, RetrievalError>;
}

/// Run `retriever.search` under `timeout`.
pub async fn search_with_timeout(
    retriever: &dyn Retriever,
    request: &SearchRequest,
    timeout: Duration,
) -> Result<Vec<RetrievedChunk>, RetrievalError> {
    match tokio::time::timeout(timeout, retriever.search(request)).await {
        Ok(result) => result,
        Err(_) => Err(RetrievalError::Timeout(timeout)),
    }
}

/// Render chunks as the context block handed to the agents.
///
/// Whitespace is collapsed, control characters are dropped and each chunk is cut to
/// [`MAX_CHUNK_CHARS`].
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }

    chunks
        .iter()
        .map(|chunk| {
            let clean = clean_text(&chunk.text);
            let excerpt: String = clean.chars().take(MAX_CHUNK_CHARS).collect();
            format!(
                "Source: {}\nContent: {}",
                chunk.source.as_deref().unwrap_or("Unknown"),
                excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, source: Option<&str>) -> RetrievedChunk {
        RetrievedChunk {
            id: "1".into(),
            text: text.into(),
            source: source.map(str::to_string),
            score: 1.0,
            dense_score: Some(1.0),
            sparse_score: None,
        }
    }

    #[test]
    fn parses_modes() {
        assert_eq!("Hybrid".parse(), Ok(SearchMode::Hybrid));
        assert_eq!(" dense ".parse(), Ok(SearchMode::Dense));
        assert_eq!("lexical".parse(), Ok(SearchMode::Sparse));
        assert_eq!("fuzzy".parse::<SearchMode>(), Err(()));
    }

    #[test]
    fn formats_sources_and_collapses_whitespace() {
        let context = format_context(&[
            chunk("Lithium\n\n 600 mg\x0c daily", Some("card.pdf")),
            chunk("ECG\tnormal\u{0}", None),
        ]);
        assert_eq!(
            context,
            "Source: card.pdf\nContent: Lithium 600 mg daily\n\nSource: Unknown\nContent: ECG normal"
        );
    }

    #[test]
    fn truncates_long_chunks() {
        let long = "ab ".repeat(2000);
        let context = format_context(&[chunk(&long, Some("x"))]);
        let content = context.split("Content: ").nth(1).expect("content");
        assert_eq!(content.chars().count(), MAX_CHUNK_CHARS);
    }

    #[test]
    fn empty_results_use_placeholder_text() {
        assert_eq!(format_context(&[]), NO_CONTEXT);
    }

    struct Stalled;

    #[async_trait]
    impl Retriever for Stalled {
        async fn search(&self, _: &SearchRequest) -> Result<Vec<RetrievedChunk>, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[test]
    fn outages_are_transient_and_bad_requests_are_not() {
        assert!(RetrievalError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            RetrievalError::Embedding(EmbeddingClientError::Unavailable("down".into()))
                .is_transient()
        );
        assert!(
            !RetrievalError::Embedding(EmbeddingClientError::GenerationFailed("dim".into()))
                .is_transient()
        );
        let unavailable = QdrantError::UnexpectedStatus {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(RetrievalError::Store(unavailable).is_transient());
        let missing = QdrantError::UnexpectedStatus {
            status: reqwest::StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(!RetrievalError::Store(missing).is_transient());
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let request = SearchRequest {
            query: "q".into(),
            k: 1,
            mode: SearchMode::Dense,
            source: None,
        };
        let error = search_with_timeout(&Stalled, &request, Duration::from_millis(10))
            .await
            .expect_err("timeout");
        assert!(matches!(error, RetrievalError::Timeout(_)));
    }
}
