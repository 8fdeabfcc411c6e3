//! Neo4j integration tests.
//!
//! Skipped unless NEO4J_URI is set. NEO4J_USER defaults to `neo4j`;
//! NEO4J_PASSWORD is read if present.

use db_tour::config::ConnectionConfig;
use db_tour::db::{Backend, BackendKind, Neo4jClient, Value};
use db_tour::error::HarnessError;
use db_tour::query::{QueryExecutor, QuerySpec};
use pretty_assertions::assert_eq;

fn test_config() -> Option<ConnectionConfig> {
    let uri = std::env::var("NEO4J_URI").ok()?;
    let mut config = ConnectionConfig::from_connection_string(&uri).ok()?;
    config.user = Some(std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()));
    config.password = std::env::var("NEO4J_PASSWORD").ok();
    config.timeout_secs = 10;
    Some(config)
}

async fn get_test_client() -> Option<Neo4jClient> {
    Neo4jClient::connect(&test_config()?).await.ok()
}

#[tokio::test]
async fn test_projected_fields_become_columns() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: NEO4J_URI not set");
        return;
    };

    let spec = QuerySpec::new(
        "literals",
        "RETURN 1 AS userId, 'Toy Story (1995)' AS title, 4.5 AS rating",
    );
    let result = client.execute(&spec).await.unwrap();

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["userId", "title", "rating"]);
    assert_eq!(result.rows[0][0], Value::Int(1));
    assert_eq!(result.rows[0][1], Value::String("Toy Story (1995)".to_string()));
    assert_eq!(result.rows[0][2], Value::Float(4.5));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_list_renders_as_path() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: NEO4J_URI not set");
        return;
    };

    let spec = QuerySpec::new("path", "RETURN ['Action', 'Adventure', 'Romance'] AS path")
        .with_line("{path:join= → }");
    let result = client.execute(&spec).await.unwrap();
    let lines = client.render(&spec, &result).unwrap();

    assert_eq!(lines, vec!["Action → Adventure → Romance"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_limit_truncates_records() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: NEO4J_URI not set");
        return;
    };

    let spec = QuerySpec::new("range", "UNWIND range(1, 25) AS n RETURN n").with_limit(10);
    let outcome = QueryExecutor::new(&client).execute(&spec).await.unwrap();

    assert_eq!(outcome.result.row_count, 10);
    assert_eq!(outcome.result.rows[9][0], Value::Int(10));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_cypher_syntax_error_is_query_error() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: NEO4J_URI not set");
        return;
    };

    let err = client
        .execute(&QuerySpec::new("bad", "MATCH (n RETURN n"))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Query(_)));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_execute_after_close_fails() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: NEO4J_URI not set");
        return;
    };

    client.close().await.unwrap();
    assert_eq!(client.kind(), BackendKind::Graph);

    let err = client
        .execute(&QuerySpec::new("late", "RETURN 1 AS n"))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Connection(_)));
}

#[tokio::test]
async fn test_wrong_password_is_connection_error() {
    let Some(mut config) = test_config() else {
        eprintln!("Skipping test: NEO4J_URI not set");
        return;
    };
    config.password = Some("definitely-not-the-password".to_string());

    let err = Neo4jClient::connect(&config).await.err().unwrap();
    assert!(matches!(err, HarnessError::Connection(_)), "got {err}");
}
