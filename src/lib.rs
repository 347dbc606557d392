#![deny(missing_docs)]

//! Core library for the Synapse medical document assistant: a PII-gated, multi-agent
//! retrieval pipeline run as asynchronous jobs.

/// Admin, Researcher and Critic roles.
pub mod agents;
/// HTTP routing and REST handlers.
pub mod api;
/// Intent routing and direct chat replies.
pub mod chat;
/// Environment-driven configuration management.
pub mod config;
/// Dense and sparse query encoders.
pub mod embedding;
/// Job records, queue and worker pool.
pub mod jobs;
/// Language-model capability and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Job and chat counters.
pub mod metrics;
/// Agent loop state machine.
pub mod orchestrator;
/// PII masking gate.
pub mod pii;
/// Qdrant vector store integration.
pub mod qdrant;
/// Retrieval capability and hybrid fusion.
pub mod retrieval;
/// Application service behind the HTTP surface.
pub mod service;
/// Agent trace sinks.
pub mod trace;
