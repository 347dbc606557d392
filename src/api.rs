//! HTTP surface for Synapse.
//!
//! - `POST /chat` – Route the last user message. Small talk is answered inline; questions about
//!   the documents become a background job whose id is returned for polling.
//! - `GET /tasks/:job_id` – Poll a job: `{job_id, status, result?, error?}`.
//! - `GET /health` – Liveness plus the worker count.
//! - `GET /metrics` – Job and chat counters.

use crate::chat::ChatMessage;
use crate::jobs::{JobId, JobView};
use crate::metrics::MetricsSnapshot;
use crate::service::{ChatReply, ChatRequest, ServiceError, SynapseApi};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: SynapseApi + 'static,
{
    Router::new()
        .route("/chat", post(chat::<S>))
        .route("/tasks/:job_id", get(task_status::<S>))
        .route("/health", get(health::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /chat`.
#[derive(Deserialize)]
struct ChatBody {
    messages: Vec<ChatMessage>,
    /// Accepted for client compatibility; the server uses its configured model.
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    document: Option<String>,
    #[serde(default)]
    restore_pii: bool,
}

async fn chat<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, AppError>
where
    S: SynapseApi,
{
    if let Some(model) = body.model.as_deref() {
        tracing::debug!(requested_model = model, "Ignoring client model override");
    }
    let reply = service
        .chat(ChatRequest {
            messages: body.messages,
            document: body.document,
            restore_pii: body.restore_pii,
        })
        .await?;
    if let Some(job_id) = &reply.job_id {
        tracing::info!(job_id = %job_id, "Chat request queued");
    }
    Ok(Json(reply))
}

async fn task_status<S>(
    State(service): State<Arc<S>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, AppError>
where
    S: SynapseApi,
{
    let view = service.job_status(&JobId::from(job_id)).await?;
    Ok(Json(view))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    workers: usize,
}

async fn health<S>(State(service): State<Arc<S>>) -> Json<HealthResponse>
where
    S: SynapseApi,
{
    Json(HealthResponse {
        status: "ok",
        workers: service.worker_count(),
    })
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: SynapseApi,
{
    Json(service.metrics_snapshot())
}

struct AppError(ServiceError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Model(_) | ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::chat::{ChatRole, Intent};
    use crate::jobs::{Job, JobId, JobInput, JobView};
    use crate::metrics::MetricsSnapshot;
    use crate::pii::PiiError;
    use crate::service::{ChatReply, ChatRequest, ServiceError, SynapseApi};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubService {
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl SynapseApi for StubService {
        async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ServiceError> {
            let content = request.messages.last().map(|m| m.content.clone());
            self.requests.lock().await.push(request);
            match content.as_deref() {
                Some("leak") => Err(ServiceError::PolicyViolation(PiiError::ControlCharacter {
                    position: 0,
                })),
                Some("hello") => Ok(ChatReply {
                    role: ChatRole::Assistant,
                    content: "Hi!".into(),
                    intent: Intent::Chat,
                    job_id: None,
                }),
                _ => Ok(ChatReply {
                    role: ChatRole::Assistant,
                    content: "queued".into(),
                    intent: Intent::Rag,
                    job_id: Some(JobId::from("job-7")),
                }),
            }
        }

        async fn job_status(&self, id: &JobId) -> Result<JobView, ServiceError> {
            if id.as_str() == "job-7" {
                let mut view = Job::new(JobInput::new("q")).view();
                view.job_id = id.clone();
                Ok(view)
            } else {
                Err(ServiceError::JobNotFound(id.clone()))
            }
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                jobs_enqueued: 4,
                ..MetricsSnapshot::default()
            }
        }

        fn worker_count(&self) -> usize {
            2
        }
    }

    async fn send(
        service: Arc<StubService>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = create_router(service)
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn chat_route_returns_job_for_rag_questions() {
        let service = Arc::new(StubService::default());
        let (status, json) = send(
            service.clone(),
            Method::POST,
            "/chat",
            Some(json!({
                "messages": [
                    { "role": "assistant", "content": "How can I help?" },
                    { "role": "user", "content": "What does patient John Smith take?" }
                ],
                "model": "llama3",
                "document": "card.pdf",
                "restore_pii": true
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["intent"], "RAG");
        assert_eq!(json["job_id"], "job-7");
        assert_eq!(json["role"], "assistant");

        let requests = service.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].document.as_deref(), Some("card.pdf"));
        assert!(requests[0].restore_pii);
    }

    #[tokio::test]
    async fn chat_route_answers_small_talk_inline() {
        let (status, json) = send(
            Arc::new(StubService::default()),
            Method::POST,
            "/chat",
            Some(json!({ "messages": [{ "role": "user", "content": "hello" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["intent"], "CHAT");
        assert_eq!(json["content"], "Hi!");
        assert!(json.get("job_id").is_none());
    }

    #[tokio::test]
    async fn policy_violations_map_to_422() {
        let (status, json) = send(
            Arc::new(StubService::default()),
            Method::POST,
            "/chat",
            Some(json!({ "messages": [{ "role": "user", "content": "leak" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().expect("error").contains("PII"));
    }

    #[tokio::test]
    async fn task_route_reports_status_and_404() {
        let service = Arc::new(StubService::default());
        let (status, json) = send(service.clone(), Method::GET, "/tasks/job-7", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["job_id"], "job-7");
        assert_eq!(json["status"], "queued");

        let (status, _) = send(service, Method::GET, "/tasks/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let service = Arc::new(StubService::default());
        let (status, json) = send(service.clone(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "status": "ok", "workers": 2 }));

        let (_, json) = send(service, Method::GET, "/metrics", None).await;
        assert_eq!(json["jobs_enqueued"], 4);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (status, _) = send(
            Arc::new(StubService::default()),
            Method::POST,
            "/chat",
            Some(json!({ "messages": [{ "role": "robot", "content": "x" }] })),
        )
        .await;
        assert!(status.is_client_error());
    }
}
