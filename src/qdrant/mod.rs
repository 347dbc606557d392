//! Qdrant vector store integration (read side).

pub mod client;
pub mod types;

pub use client::{QdrantService, source_filter};
pub use types::{QdrantError, QueryVector, ScoredPoint};
