//! HTTP client wrapper for querying Qdrant.

use crate::config::get_config;
use crate::qdrant::types::{
    QdrantError, QueryResponse, QueryResponseResult, QueryVector, ScoredPoint,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client using configuration derived from the environment.
    pub fn from_config() -> Result<Self, QdrantError> {
        let config = get_config();
        Self::new(&config.qdrant_url, config.qdrant_api_key.clone())
    }

    /// Construct a client for an explicit endpoint.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("synapse/0.2").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Query a collection, returning scored payloads ordered by descending score.
    ///
    /// `using` selects a named vector (for example the sparse `text-sparse` index); `None`
    /// searches the default dense vector.
    pub async fn search_points(
        &self,
        collection_name: &str,
        query: &QueryVector,
        filter: Option<Value>,
        limit: usize,
        using: Option<&str>,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = serde_json::Map::new();
        body.insert("query".into(), query.to_json());
        body.insert("limit".into(), Value::from(limit));
        body.insert("with_payload".into(), Value::Bool(true));

        if let Some(name) = using.map(str::trim).filter(|name| !name.is_empty()) {
            body.insert("using".into(), Value::String(name.to_string()));
        }

        if let Some(filter_value) = filter {
            body.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )
            .json(&Value::Object(body))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    /// Check whether a collection is present.
    pub async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

/// Exact-match filter on the `filename` payload field.
pub fn source_filter(filename: &str) -> Value {
    json!({
        "must": [
            {
                "key": "filename",
                "match": { "value": filename }
            }
        ]
    })
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, MockServer};

    fn service(server: &MockServer) -> QdrantService {
        QdrantService::new(&server.base_url(), Some("secret".into())).expect("client")
    }

    #[tokio::test]
    async fn dense_search_emits_expected_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .header("api-key", "secret")
                    .json_body(json!({
                        "query": [0.5, 0.25],
                        "limit": 3,
                        "with_payload": true,
                        "filter": {
                            "must": [
                                { "key": "filename", "match": { "value": "card.pdf" } }
                            ]
                        }
                    }));
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": 7,
                                "score": 0.42,
                                "payload": { "content": "Example", "filename": "card.pdf" }
                            }
                        ]
                    }
                }));
            })
            .await;

        let results = service(&server)
            .search_points(
                "documents",
                &QueryVector::Dense(vec![0.5, 0.25]),
                Some(source_filter("card.pdf")),
                3,
                None,
            )
            .await
            .expect("search request");

        mock.assert_async().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "7");
        assert!((results[0].score - 0.42).abs() < f32::EPSILON);
        let payload = results[0].payload.as_ref().expect("payload");
        assert_eq!(payload["content"], Value::String("Example".into()));
    }

    #[tokio::test]
    async fn sparse_search_uses_named_vector() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .json_body_partial(
                        r#"{"using":"text-sparse","query":{"indices":[3,9],"values":[1.0,2.0]}}"#,
                    );
                then.status(200).json_body(json!({
                    "result": [
                        { "id": "a1b2", "score": 3.5, "payload": null }
                    ]
                }));
            })
            .await;

        let results = service(&server)
            .search_points(
                "documents",
                &QueryVector::Sparse {
                    indices: vec![3, 9],
                    values: vec![1.0, 2.0],
                },
                None,
                5,
                Some("text-sparse"),
            )
            .await
            .expect("search request");

        mock.assert_async().await;
        assert_eq!(results[0].id, "a1b2");
        assert!(results[0].payload.is_none());
    }

    #[tokio::test]
    async fn failed_search_reports_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/missing/points/query");
                then.status(404).body("Not found: Collection `missing` doesn't exist!");
            })
            .await;

        let error = service(&server)
            .search_points("missing", &QueryVector::Dense(vec![1.0]), None, 1, None)
            .await
            .expect_err("missing collection");
        assert!(matches!(
            error,
            QdrantError::UnexpectedStatus { status, .. } if status == StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn collection_exists_maps_status_codes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/other");
                then.status(404);
            })
            .await;

        let service = service(&server);
        assert!(service.collection_exists("documents").await.expect("ok"));
        assert!(!service.collection_exists("other").await.expect("ok"));
    }

    #[test]
    fn point_ids_are_stringified() {
        assert_eq!(stringify_point_id(json!(12)), "12");
        assert_eq!(stringify_point_id(json!({ "uuid": "abc" })), "abc");
        assert_eq!(stringify_point_id(Value::Null), "");
    }
}
