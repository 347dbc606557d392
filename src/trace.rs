//! Agent trace sinks. Events only ever carry masked text.

use crate::agents::Role;
use crate::jobs::JobId;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// What a traced step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// A language-model call.
    Generate,
    /// A retrieval call.
    Retrieve,
}

/// One traced model or retrieval call.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Job the call belongs to.
    pub job_id: JobId,
    /// Agent that made the call.
    pub role: Role,
    /// Kind of call.
    pub kind: TraceKind,
    /// Masked input.
    pub input: String,
    /// Masked output, or the error description.
    pub output: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Wall-clock duration in milliseconds.
    pub latency_ms: u64,
}

impl TraceEvent {
    /// Build an event, measuring `latency` in whole milliseconds.
    pub fn new(
        job_id: &JobId,
        role: Role,
        kind: TraceKind,
        input: impl Into<String>,
        output: impl Into<String>,
        ok: bool,
        latency: Duration,
    ) -> Self {
        Self {
            job_id: job_id.clone(),
            role,
            kind,
            input: input.into(),
            output: output.into(),
            ok,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Destination for trace events. Recording never fails and never blocks the caller.
pub trait TraceSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: TraceEvent);
}

/// Writes events to the tracing log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, event: TraceEvent) {
        tracing::debug!(
            target: "synapse::trace",
            job_id = %event.job_id,
            role = %event.role,
            kind = ?event.kind,
            ok = event.ok,
            latency_ms = event.latency_ms,
            input_chars = event.input.chars().count(),
            output = %event.output,
            "Agent step"
        );
    }
}

/// Posts events as JSON to an external collector. Delivery failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct HttpTraceSink {
    http: Client,
    url: String,
}

impl HttpTraceSink {
    /// Build a sink posting to `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("synapse/trace")
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl TraceSink for HttpTraceSink {
    fn record(&self, event: TraceEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available; trace event dropped");
            return;
        };
        let http = self.http.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            match http.post(&url).json(&event).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "Trace collector rejected event");
                }
                Err(error) => tracing::warn!(error = %error, "Trace delivery failed"),
            }
        });
    }
}
