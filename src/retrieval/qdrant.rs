use super::{
    FusionWeights, RetrievalError, RetrievedChunk, Retriever, SearchMode, SearchRequest, fuse,
};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, SparseEncoder};
use crate::qdrant::{QdrantService, QueryVector, ScoredPoint, source_filter};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Name of the sparse vector in the hybrid collection.
pub const SPARSE_VECTOR_NAME: &str = "text-sparse";

const TEXT_FIELDS: [&str; 3] = ["content", "text", "page_content"];
const SOURCE_FIELDS: [&str; 2] = ["filename", "source"];

/// [`Retriever`] over a Qdrant collection holding a default dense vector and a
/// `text-sparse` sparse vector per chunk.
pub struct QdrantRetriever {
    qdrant: QdrantService,
    embedder: Box<dyn EmbeddingClient + Send + Sync>,
    sparse: SparseEncoder,
    collection: String,
    weights: FusionWeights,
}

impl QdrantRetriever {
    /// Build a retriever over `collection`.
    pub fn new(
        qdrant: QdrantService,
        embedder: Box<dyn EmbeddingClient + Send + Sync>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            qdrant,
            embedder,
            sparse: SparseEncoder,
            collection: collection.into(),
            weights: FusionWeights::default(),
        }
    }

    /// Override the hybrid fusion weights.
    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    async fn dense(
        &self,
        query: &str,
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let vector = self
            .embedder
            .generate_embeddings(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingClientError::GenerationFailed("empty embedding batch".into()))?;
        let points = self
            .qdrant
            .search_points(
                &self.collection,
                &QueryVector::Dense(vector),
                filter,
                limit,
                None,
            )
            .await?;
        Ok(points
            .into_iter()
            .filter_map(|point| to_chunk(point, SearchMode::Dense))
            .collect())
    }

    async fn sparse(
        &self,
        query: &str,
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let encoded = self.sparse.encode(query);
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        let points = self
            .qdrant
            .search_points(
                &self.collection,
                &QueryVector::Sparse {
                    indices: encoded.indices,
                    values: encoded.values,
                },
                filter,
                limit,
                Some(SPARSE_VECTOR_NAME),
            )
            .await?;
        Ok(points
            .into_iter()
            .filter_map(|point| to_chunk(point, SearchMode::Sparse))
            .collect())
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if request.k == 0 {
            return Ok(Vec::new());
        }
        let filter = request.source.as_deref().map(source_filter);

        let chunks = match request.mode {
            SearchMode::Dense => self.dense(&request.query, request.k, filter).await?,
            SearchMode::Sparse => self.sparse(&request.query, request.k, filter).await?,
            SearchMode::Hybrid => {
                // Over-fetch so fusion has candidates beyond each list's top k.
                let limit = request.k * 2;
                let (dense, sparse) = tokio::join!(
                    self.dense(&request.query, limit, filter.clone()),
                    self.sparse(&request.query, limit, filter),
                );
                match (dense, sparse) {
                    (Ok(dense), Ok(sparse)) => fuse(dense, sparse, request.k, self.weights),
                    (Ok(dense), Err(error)) => {
                        tracing::warn!(error = %error, "Sparse index failed; ranking dense hits only");
                        fuse(dense, Vec::new(), request.k, self.weights)
                    }
                    (Err(error), Ok(sparse)) => {
                        tracing::warn!(error = %error, "Dense index failed; ranking sparse hits only");
                        fuse(Vec::new(), sparse, request.k, self.weights)
                    }
                    (Err(error), Err(_)) => return Err(error),
                }
            }
        };

        tracing::debug!(
            collection = %self.collection,
            mode = ?request.mode,
            k = request.k,
            hits = chunks.len(),
            "Retrieval completed"
        );
        Ok(chunks)
    }
}

fn to_chunk(point: ScoredPoint, mode: SearchMode) -> Option<RetrievedChunk> {
    let payload = point.payload.unwrap_or_default();
    let text = first_string(&payload, &TEXT_FIELDS)?;
    let source = first_string(&payload, &SOURCE_FIELDS);
    Some(RetrievedChunk {
        id: point.id,
        text,
        source,
        score: point.score,
        dense_score: (mode == SearchMode::Dense).then_some(point.score),
        sparse_score: (mode == SearchMode::Sparse).then_some(point.score),
    })
}

fn first_string(payload: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .find(|value| !value.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingClient;
    use httpmock::{Method::POST, MockServer};
    use regex::Regex;
    use serde_json::json;

    fn retriever(server: &MockServer) -> QdrantRetriever {
        QdrantRetriever::new(
            QdrantService::new(&server.base_url(), None).expect("client"),
            Box::new(HashingEmbeddingClient::new(8)),
            "documents",
        )
    }

    fn request(mode: SearchMode) -> SearchRequest {
        SearchRequest {
            query: "lithium dosage".into(),
            k: 2,
            mode,
            source: Some("card.pdf".into()),
        }
    }

    #[tokio::test]
    async fn hybrid_merges_both_indexes() {
        let server = MockServer::start_async().await;
        let sparse = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .json_body_partial(r#"{"using":"text-sparse","limit":4}"#);
                then.status(200).json_body(json!({
                    "result": { "points": [
                        { "id": 2, "score": 4.0, "payload": { "content": "Lithium 600 mg", "filename": "card.pdf" } },
                        { "id": 3, "score": 2.0, "payload": { "text": "Creatinine normal", "source": "labs.pdf" } }
                    ]}
                }));
            })
            .await;
        let dense = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .body_matches(Regex::new(r#""query":\["#).expect("regex"))
                    .json_body_partial(r#"{"limit":4,"filter":{"must":[{"key":"filename","match":{"value":"card.pdf"}}]}}"#);
                then.status(200).json_body(json!({
                    "result": [
                        { "id": 1, "score": 0.91, "payload": { "content": "Patient on lithium", "filename": "card.pdf" } },
                        { "id": 2, "score": 0.85, "payload": { "content": "Lithium 600 mg", "filename": "card.pdf" } },
                        { "id": 9, "score": 0.50, "payload": { "other": "no text field" } }
                    ]
                }));
            })
            .await;

        let chunks = retriever(&server)
            .search(&request(SearchMode::Hybrid))
            .await
            .expect("hybrid search");

        sparse.assert_hits_async(1).await;
        dense.assert_hits_async(1).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "2");
        assert_eq!(chunks[0].dense_score, Some(0.85));
        assert_eq!(chunks[0].sparse_score, Some(4.0));
        assert_eq!(chunks[1].id, "1");
    }

    #[tokio::test]
    async fn hybrid_falls_back_to_the_index_that_answers() {
        let server = MockServer::start_async().await;
        let sparse = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .json_body_partial(r#"{"using":"text-sparse"}"#);
                then.status(500).body("sparse index missing");
            })
            .await;
        let dense = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .body_matches(Regex::new(r#""query":\["#).expect("regex"));
                then.status(200).json_body(json!({
                    "result": [
                        { "id": 1, "score": 0.91, "payload": { "content": "Patient on lithium", "filename": "card.pdf" } },
                        { "id": 2, "score": 0.85, "payload": { "content": "Lithium 600 mg", "filename": "card.pdf" } },
                        { "id": 4, "score": 0.40, "payload": { "content": "Follow-up in May", "filename": "card.pdf" } }
                    ]
                }));
            })
            .await;

        let chunks = retriever(&server)
            .search(&request(SearchMode::Hybrid))
            .await
            .expect("dense hits survive");

        sparse.assert_hits_async(1).await;
        dense.assert_hits_async(1).await;
        let ids: Vec<_> = chunks.iter().map(|chunk| chunk.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert!(chunks.iter().all(|chunk| chunk.sparse_score.is_none()));
    }

    #[tokio::test]
    async fn hybrid_fails_when_both_indexes_fail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/query");
                then.status(503).body("unavailable");
            })
            .await;

        let error = retriever(&server)
            .search(&request(SearchMode::Hybrid))
            .await
            .expect_err("both down");
        assert!(matches!(error, RetrievalError::Store(_)));
    }

    #[tokio::test]
    async fn sparse_mode_reads_alternate_payload_fields() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .json_body_partial(r#"{"using":"text-sparse","limit":2}"#);
                then.status(200).json_body(json!({
                    "result": [
                        { "id": "x", "score": 1.5, "payload": { "page_content": "ECG normal", "source": "ecg.pdf" } }
                    ]
                }));
            })
            .await;

        let chunks = retriever(&server)
            .search(&request(SearchMode::Sparse))
            .await
            .expect("sparse search");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "ECG normal");
        assert_eq!(chunks[0].source.as_deref(), Some("ecg.pdf"));
        assert_eq!(chunks[0].dense_score, None);
    }

    #[tokio::test]
    async fn store_failures_surface_as_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/query");
                then.status(500).body("boom");
            })
            .await;

        let error = retriever(&server)
            .search(&request(SearchMode::Dense))
            .await
            .expect_err("500");
        assert!(matches!(error, RetrievalError::Store(_)));
    }
}
