//! Chroma vector-search client.
//!
//! Query text is embedded through an Ollama-compatible embedding service and
//! sent to the collection's query endpoint. Chroma reports distances; rows
//! carry both the raw `distance` and `similarity = 1 - distance`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ConnectionConfig, EmbedderConfig};
use crate::db::{Backend, BackendKind, QueryResult, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;

/// Number of neighbours requested when a query has no limit.
const DEFAULT_N_RESULTS: usize = 10;

const DEFAULT_TENANT: &str = "default_tenant";
const DEFAULT_DATABASE: &str = "default_database";

/// Converts a Chroma distance into a similarity score.
///
/// Distances are not validated; metrics with distances above 1 yield
/// negative scores.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 - distance
}

/// Chroma query response. Outer lists hold one entry per query embedding,
/// inner lists are index-aligned across fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChromaQueryResponse {
    pub ids: Vec<Vec<String>>,
    #[serde(default)]
    pub documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    pub metadatas: Option<Vec<Vec<Option<serde_json::Map<String, serde_json::Value>>>>>,
    #[serde(default)]
    pub distances: Option<Vec<Vec<Option<f64>>>>,
}

/// Converts the first query's neighbours into rows.
///
/// Columns: `id`, `document`, the union of metadata keys, `distance`,
/// `similarity`.
pub fn rows_from_response(response: ChromaQueryResponse) -> Result<QueryResult> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let n = ids.len();

    let documents = first_aligned(response.documents, n, "documents")?;
    let metadatas = first_aligned(response.metadatas, n, "metadatas")?;
    let distances = first_aligned(response.distances, n, "distances")?;

    let mut meta_keys: Vec<String> = Vec::new();
    for meta in metadatas.iter().flatten() {
        for key in meta.keys() {
            if !meta_keys.contains(key) {
                meta_keys.push(key.clone());
            }
        }
    }

    let mut records = Vec::with_capacity(n);
    for (i, id) in ids.into_iter().enumerate() {
        let mut record = vec![
            ("id".to_string(), Value::String(id)),
            ("document".to_string(), Value::from(documents[i].clone())),
        ];

        let meta = metadatas[i].as_ref();
        for key in &meta_keys {
            let value = meta
                .and_then(|m| m.get(key))
                .cloned()
                .map(Value::from_json)
                .unwrap_or(Value::Null);
            record.push((key.clone(), value));
        }

        let distance = distances[i];
        if let Some(d) = distance {
            if !(0.0..=2.0).contains(&d) {
                warn!("Distance {d} is outside [0, 2]; similarity will be {}", distance_to_similarity(d));
            }
        }
        record.push(("distance".to_string(), Value::from(distance)));
        record.push((
            "similarity".to_string(),
            Value::from(distance.map(distance_to_similarity)),
        ));
        records.push(record);
    }

    Ok(QueryResult::from_records(records))
}

/// Returns the first inner list, or `n` empty slots when the field was not
/// included. Errors when its length differs from the id list.
fn first_aligned<T: Clone + Default>(
    field: Option<Vec<Vec<T>>>,
    n: usize,
    name: &str,
) -> Result<Vec<T>> {
    match field.and_then(|outer| outer.into_iter().next()) {
        None => Ok(vec![T::default(); n]),
        Some(inner) if inner.len() == n => Ok(inner),
        Some(inner) => Err(HarnessError::query(format!(
            "Chroma response is misaligned: {n} ids but {} {name}",
            inner.len()
        ))),
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    include: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeds query text through an Ollama-compatible `/api/embed` endpoint.
#[derive(Debug, Clone)]
struct Embedder {
    config: EmbedderConfig,
    client: Client,
}

impl Embedder {
    fn new(config: EmbedderConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Checks if the embedding service is reachable.
    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.url);
        self.client.get(&url).send().await.is_ok()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: vec![text],
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.config.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| HarnessError::query(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::query(format!(
                "Embedding service returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| HarnessError::query(format!("Invalid embedding response: {e}")))?;

        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::query("Embedding service returned no vectors"))
    }
}

/// Chroma HTTP client bound to one collection.
#[derive(Debug)]
pub struct ChromaClient {
    client: Client,
    collection_url: String,
    user: Option<String>,
    password: Option<String>,
    embedder: Embedder,
}

impl ChromaClient {
    /// Resolves the configured collection and checks the embedding service.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarnessError::connection(format!("Failed to create HTTP client: {e}")))?;

        let endpoint = config.endpoint_or_default();
        let base = endpoint.trim_end_matches('/');
        let tenant = config.tenant.as_deref().unwrap_or(DEFAULT_TENANT);
        let database = config.database.as_deref().unwrap_or(DEFAULT_DATABASE);
        let collection = config.require_collection()?;

        let databases_url = format!("{base}/api/v2/tenants/{tenant}/databases/{database}");

        let mut this = Self {
            client: client.clone(),
            collection_url: String::new(),
            user: config.user.clone(),
            password: config.password.clone(),
            embedder: Embedder::new(config.embedder.clone().unwrap_or_default(), client),
        };

        let response = this
            .authorized(this.client.get(format!("{databases_url}/collections/{collection}")))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    HarnessError::connection(format!(
                        "Cannot connect to {endpoint}. Check that Chroma is running."
                    ))
                } else {
                    HarnessError::connection(format!("Request to {endpoint} failed: {e}"))
                }
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(HarnessError::connection(format!(
                    "Authentication failed for Chroma at {endpoint}. Check your credentials."
                )))
            }
            StatusCode::NOT_FOUND => {
                return Err(HarnessError::connection(format!(
                    "Collection '{collection}' does not exist in {tenant}/{database}."
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(HarnessError::connection(format!(
                    "Chroma returned {status}: {body}"
                )));
            }
        }

        let info: CollectionInfo = response
            .json()
            .await
            .map_err(|e| HarnessError::connection(format!("Invalid collection response: {e}")))?;
        debug!("Resolved collection '{collection}' to id {}", info.id);
        this.collection_url = format!("{databases_url}/collections/{}", info.id);

        if !this.embedder.is_available().await {
            return Err(HarnessError::connection(format!(
                "Embedding service not reachable at {}",
                this.embedder.config.url
            )));
        }

        Ok(this)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }
}

#[async_trait]
impl Backend for ChromaClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let embedding = self.embedder.embed(&spec.body).await?;

        let request = QueryRequest {
            query_embeddings: vec![embedding],
            n_results: spec.limit.unwrap_or(DEFAULT_N_RESULTS),
            include: &["documents", "metadatas", "distances"],
        };

        let response = self
            .authorized(self.client.post(format!("{}/query", self.collection_url)))
            .json(&request)
            .send()
            .await
            .map_err(|e| HarnessError::query(format!("Chroma query failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::query(format!(
                "Chroma returned {status}: {body}"
            )));
        }

        let parsed: ChromaQueryResponse = response
            .json()
            .await
            .map_err(|e| HarnessError::query(format!("Invalid Chroma response: {e}")))?;

        rows_from_response(parsed)
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing Chroma client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_result;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn synthetic_response(distances: &[f64]) -> ChromaQueryResponse {
        let n = distances.len();
        serde_json::from_value(json!({
            "ids": [(0..n).map(|i| format!("m{i}")).collect::<Vec<_>>()],
            "documents": [(0..n).map(|i| format!("doc {i}")).collect::<Vec<_>>()],
            "metadatas": [(0..n).map(|i| json!({"title": format!("Movie {i}"), "genres": "Comedy"})).collect::<Vec<_>>()],
            "distances": [distances],
        }))
        .unwrap()
    }

    #[test]
    fn test_distance_to_similarity() {
        for d in [0.0, 0.25, 1.0, 1.5, 2.0] {
            assert_eq!(distance_to_similarity(d), 1.0 - d);
        }
        assert!(distance_to_similarity(3.0) < 0.0);
    }

    #[test]
    fn test_rows_from_response_columns() {
        let result = rows_from_response(synthetic_response(&[0.1, 0.4, 0.9])).unwrap();

        let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "document", "title", "genres", "distance", "similarity"]
        );
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[0][2], Value::from("Movie 0"));
    }

    #[test]
    fn test_rendered_similarities_in_rank_order() {
        let result = rows_from_response(synthetic_response(&[0.1, 0.4, 0.9])).unwrap();
        let spec = QuerySpec::new("q", "toy story").with_line("{#}. {title} (similarity: {similarity:.3})");

        let lines = render_result(&spec, &result).unwrap();
        assert_eq!(
            lines,
            vec![
                "1. Movie 0 (similarity: 0.900)",
                "2. Movie 1 (similarity: 0.600)",
                "3. Movie 2 (similarity: 0.100)",
            ]
        );
    }

    #[test]
    fn test_missing_metadata_is_null() {
        let response: ChromaQueryResponse = serde_json::from_value(json!({
            "ids": [["a", "b"]],
            "documents": [["x", null]],
            "metadatas": [[{"title": "A"}, null]],
            "distances": [[0.2, 0.3]],
        }))
        .unwrap();

        let result = rows_from_response(response).unwrap();
        let row = &result.rows[1];
        assert_eq!(result.lookup(row, "title"), Some(&Value::Null));
        assert_eq!(result.lookup(row, "document"), Some(&Value::Null));
    }

    #[test]
    fn test_misaligned_response_is_query_error() {
        let response: ChromaQueryResponse = serde_json::from_value(json!({
            "ids": [["a", "b"]],
            "distances": [[0.2]],
        }))
        .unwrap();

        let err = rows_from_response(response).unwrap_err();
        assert!(matches!(err, HarnessError::Query(_)));
        assert!(err.to_string().contains("misaligned"));
    }

    #[test]
    fn test_empty_response() {
        let result = rows_from_response(ChromaQueryResponse::default()).unwrap();
        assert!(result.is_empty());
    }
}
