//! Document backend integration tests.
//!
//! The fixture tests go through `db::connect` with a `file://` endpoint.
//! MongoDB tests skip unless MONGODB_URI is set; MONGODB_DATABASE and
//! MONGODB_COLLECTION default to `movielens` and `movies`.

use db_tour::config::ConnectionConfig;
use db_tour::db::{self, Backend, BackendKind, MongoClient, Value};
use db_tour::error::HarnessError;
use db_tour::query::QuerySpec;
use pretty_assertions::assert_eq;

fn fixture_config() -> ConnectionConfig {
    ConnectionConfig {
        kind: BackendKind::Document,
        endpoint: Some(format!(
            "file://{}",
            concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/movies.json")
        )),
        ..Default::default()
    }
}

async fn fixture_backend() -> Box<dyn Backend> {
    db::connect(&fixture_config()).await.unwrap()
}

fn titles(result: &db_tour::db::QueryResult) -> Vec<String> {
    let index = result.column_index("title").unwrap();
    result
        .rows
        .iter()
        .map(|row| row[index].to_display_string())
        .collect()
}

#[tokio::test]
async fn test_fixture_find_with_nested_filter_and_sort() {
    let backend = fixture_backend().await;

    let spec = QuerySpec::new(
        "top rated",
        r#"{
            "find": {"ratings.count": {"$gte": 200}},
            "projection": {"_id": 0, "title": 1, "ratings.average": 1},
            "sort": {"ratings.average": -1}
        }"#,
    );
    let result = backend.execute(&spec).await.unwrap();

    assert_eq!(
        titles(&result),
        vec![
            "Matrix, The (1999)",
            "Forrest Gump (1994)",
            "Seven (a.k.a. Se7en) (1995)",
            "Toy Story (1995)"
        ]
    );
    assert_eq!(
        result.lookup(&result.rows[0], "ratings.average"),
        Some(&Value::Float(4.19))
    );
    assert!(result.column_index("genres").is_none());

    backend.close().await.unwrap();
}

#[tokio::test]
async fn test_fixture_missing_fields_become_null() {
    let backend = fixture_backend().await;

    let spec = QuerySpec::new(
        "documentaries",
        r#"{"find": {"genres": "Documentary"}, "projection": {"_id": 0, "title": 1, "ratings": 1}}"#,
    );
    let result = backend.execute(&spec).await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(titles(&result), vec!["Untitled Documentary"]);
    assert_eq!(result.lookup(&result.rows[0], "ratings.average"), None);

    backend.close().await.unwrap();
}

#[tokio::test]
async fn test_fixture_limit_applies_to_pipeline() {
    let backend = fixture_backend().await;

    let spec = QuerySpec::new(
        "genres",
        r#"{
            "aggregate": [
                {"$unwind": "$genres"},
                {"$group": {"_id": "$genres", "count": {"$sum": 1}}},
                {"$sort": {"count": -1}}
            ]
        }"#,
    )
    .with_limit(2);
    let result = backend.execute(&spec).await.unwrap();

    assert_eq!(result.row_count, 2);
    let id = result.column_index("_id").unwrap();
    let count = result.column_index("count").unwrap();
    assert_eq!(result.rows[0][id], Value::String("Thriller".to_string()));
    assert_eq!(result.rows[0][count], Value::Int(4));
    assert_eq!(result.rows[1][id], Value::String("Action".to_string()));

    backend.close().await.unwrap();
}

#[tokio::test]
async fn test_fixture_malformed_body_is_query_error() {
    let backend = fixture_backend().await;

    for body in [r#"{"find": "#, r#"{"update": {}}"#, "[]"] {
        let err = backend
            .execute(&QuerySpec::new("bad", body))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Query(_)), "{body}: {err}");
    }

    backend.close().await.unwrap();
}

/// Helper to create a MongoDB client from MONGODB_URI.
async fn get_test_client() -> Option<MongoClient> {
    let uri = std::env::var("MONGODB_URI").ok()?;
    let mut config = ConnectionConfig::from_connection_string(&uri).ok()?;
    config.database = Some(std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "movielens".to_string()));
    config.collection =
        Some(std::env::var("MONGODB_COLLECTION").unwrap_or_else(|_| "movies".to_string()));
    MongoClient::connect(&config).await.ok()
}

#[tokio::test]
async fn test_mongodb_find_respects_limit() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: MONGODB_URI not set");
        return;
    };

    let spec = QuerySpec::new(
        "any",
        r#"{"find": {}, "projection": {"_id": 0, "title": 1}}"#,
    )
    .with_limit(3);
    let result = client.execute(&spec).await.unwrap();

    assert!(result.row_count <= 3);
    assert_eq!(client.kind(), BackendKind::Document);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_mongodb_aggregate_runs() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: MONGODB_URI not set");
        return;
    };

    let spec = QuerySpec::new(
        "count",
        r#"{"aggregate": [{"$group": {"_id": null, "n": {"$sum": 1}}}]}"#,
    );
    let result = client.execute(&spec).await.unwrap();
    assert!(result.row_count <= 1);

    client.close().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_mongodb_unreachable_is_connection_error() {
    let config = ConnectionConfig {
        kind: BackendKind::Document,
        endpoint: Some("mongodb://127.0.0.1:1".to_string()),
        database: Some("movielens".to_string()),
        collection: Some("movies".to_string()),
        timeout_secs: 1,
        ..Default::default()
    };

    let err = MongoClient::connect(&config).await.err().unwrap();
    assert!(matches!(err, HarnessError::Connection(_)), "got {err}");
}
