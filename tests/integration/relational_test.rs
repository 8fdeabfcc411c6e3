//! PostgreSQL integration tests.
//!
//! Tests that need a server skip unless DATABASE_URL is set.

use db_tour::config::ConnectionConfig;
use db_tour::db::{Backend, BackendKind, PostgresClient, Value};
use db_tour::error::HarnessError;
use db_tour::query::QuerySpec;

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresClient::connect(&config).await.ok()
}

#[tokio::test]
async fn test_select_returns_typed_values() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let spec = QuerySpec::new(
        "scalars",
        "SELECT 42::int8 AS answer, 'Heat (1995)'::text AS title, 3.95::float8 AS avg_rating, NULL::text AS missing",
    );
    let result = client.execute(&spec).await.unwrap();

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["answer", "title", "avg_rating", "missing"]);
    assert_eq!(result.rows[0][0], Value::Int(42));
    assert_eq!(result.rows[0][1], Value::String("Heat (1995)".to_string()));
    assert_eq!(result.rows[0][2], Value::Float(3.95));
    assert!(result.rows[0][3].is_null());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_arrays_and_json_are_converted() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let spec = QuerySpec::new(
        "nested",
        r#"SELECT ARRAY['Action', 'Thriller']::text[] AS genres, '{"count": 3}'::jsonb AS extra"#,
    );
    let result = client.execute(&spec).await.unwrap();

    assert_eq!(
        result.rows[0][0],
        Value::List(vec![
            Value::String("Action".to_string()),
            Value::String("Thriller".to_string())
        ])
    );
    assert_eq!(result.lookup(&result.rows[0], "extra.count"), Some(&Value::Int(3)));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_result_has_no_rows() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let spec = QuerySpec::new("empty", "SELECT 1 AS n WHERE false");
    let result = client.execute(&spec).await.unwrap();
    assert!(result.is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_sql_error_is_query_error() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let spec = QuerySpec::new("missing table", "SELECT * FROM no_such_table_for_tour");
    let err = client.execute(&spec).await.unwrap_err();
    assert!(matches!(err, HarnessError::Query(_)));
    assert!(err.to_string().contains("no_such_table_for_tour"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_write_statement_refused_before_reaching_server() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let spec = QuerySpec::new("drop", "DROP TABLE movie_stats");
    let err = client.execute(&spec).await.unwrap_err();
    assert!(err.to_string().contains("read-only"));
    assert_eq!(client.kind(), BackendKind::Relational);

    client.close().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_port() {
    let config = ConnectionConfig {
        kind: BackendKind::Relational,
        endpoint: Some("postgres://127.0.0.1:59999".to_string()),
        database: Some("movielens".to_string()),
        user: Some("admin".to_string()),
        password: Some("admin".to_string()),
        timeout_secs: 2,
        ..Default::default()
    };

    let err = PostgresClient::connect(&config).await.err().unwrap();
    assert!(matches!(err, HarnessError::Connection(_)), "got {err}");
}
