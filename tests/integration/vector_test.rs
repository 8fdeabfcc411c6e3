//! Chroma integration tests.
//!
//! Live tests skip unless CHROMA_URL is set. CHROMA_COLLECTION defaults to
//! `movies`; EMBEDDER_URL and EMBEDDER_MODEL override the embedding service.

use db_tour::config::{ConnectionConfig, EmbedderConfig};
use db_tour::db::{
    distance_to_similarity, rows_from_response, Backend, BackendKind, ChromaClient,
    ChromaQueryResponse, Value,
};
use db_tour::error::HarnessError;
use db_tour::query::QuerySpec;
use serde_json::json;

fn test_config() -> Option<ConnectionConfig> {
    let endpoint = std::env::var("CHROMA_URL").ok()?;
    let mut embedder = EmbedderConfig::default();
    if let Ok(url) = std::env::var("EMBEDDER_URL") {
        embedder.url = url;
    }
    if let Ok(model) = std::env::var("EMBEDDER_MODEL") {
        embedder.model = model;
    }
    Some(ConnectionConfig {
        kind: BackendKind::Vector,
        endpoint: Some(endpoint),
        collection: Some(
            std::env::var("CHROMA_COLLECTION").unwrap_or_else(|_| "movies".to_string()),
        ),
        embedder: Some(embedder),
        ..Default::default()
    })
}

async fn get_test_client() -> Option<ChromaClient> {
    ChromaClient::connect(&test_config()?).await.ok()
}

fn column(result: &db_tour::db::QueryResult, name: &str) -> Vec<Value> {
    let index = result.column_index(name).unwrap();
    result.rows.iter().map(|row| row[index].clone()).collect()
}

#[tokio::test]
async fn test_neighbours_carry_similarity() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: CHROMA_URL not set");
        return;
    };

    let spec = QuerySpec::new("toy story", "Toy Story animated adventure family comedy")
        .with_limit(5);
    let result = client.execute(&spec).await.unwrap();

    assert!(result.row_count <= 5);
    let distances = column(&result, "distance");
    let similarities = column(&result, "similarity");
    for (distance, similarity) in distances.iter().zip(&similarities) {
        let d = distance.as_f64().unwrap();
        assert_eq!(similarity.as_f64().unwrap(), distance_to_similarity(d));
    }
    for pair in distances.windows(2) {
        assert!(pair[0].as_f64() <= pair[1].as_f64());
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_chroma_is_connection_error() {
    let config = ConnectionConfig {
        kind: BackendKind::Vector,
        endpoint: Some("http://127.0.0.1:1".to_string()),
        collection: Some("movies".to_string()),
        timeout_secs: 2,
        ..Default::default()
    };

    let err = ChromaClient::connect(&config).await.err().unwrap();
    assert!(matches!(err, HarnessError::Connection(_)), "got {err}");
}

#[test]
fn test_out_of_range_distance_is_kept() {
    let response: ChromaQueryResponse = serde_json::from_value(json!({
        "ids": [["a", "b"]],
        "documents": [["x", "y"]],
        "metadatas": [[{"title": "Near"}, {"title": "Far"}]],
        "distances": [[0.5, 2.5]],
    }))
    .unwrap();

    let result = rows_from_response(response).unwrap();
    let similarities = column(&result, "similarity");
    assert_eq!(similarities, vec![Value::Float(0.5), Value::Float(-1.5)]);
}
