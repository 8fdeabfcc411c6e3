//! End-to-end harness runs against the bundled document fixture.
//!
//! The built-in MongoDB tour is pointed at `tests/fixtures/movies.json`
//! through a `file://` endpoint, so these tests need no servers.

use db_tour::config::{BackendConfig, Config};
use db_tour::error::HarnessError;
use db_tour::harness::Harness;
use pretty_assertions::assert_eq;

fn fixture_endpoint() -> String {
    format!(
        "file://{}",
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/movies.json")
    )
}

/// The built-in document backend, served from the fixture.
fn fixture_backend() -> BackendConfig {
    let config = Config::builtin().unwrap();
    let mut backend = config.backend("mongodb").unwrap().clone();
    backend.connection.endpoint = Some(fixture_endpoint());
    backend
}

#[tokio::test]
async fn test_builtin_document_tour_renders_queries() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();

    let summary = Harness::new(dir.path())
        .run(&fixture_backend(), &mut out)
        .await
        .unwrap();
    assert_eq!(summary.queries_run, 4);

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with(&"=".repeat(80)));
    assert!(text.contains("MONGODB QUERIES - Document Flexibility"));
    assert!(text.contains("Query 1: Action Movies with Rating > 4.0"));
    assert!(text.contains("Matrix, The (1999): 4.19 (278 ratings)"));
    assert!(!text.contains("Heat (1995): 3.95"));
    assert!(text.contains("Matrix, The (1999): 3 tags"));
    assert!(text.contains("Thriller: 4 movies"));
    assert!(text.contains("Forrest Gump (1994): 4.16 (329 ratings)"));
    assert!(text.contains("MongoDB demonstrates:"));
}

#[tokio::test]
async fn test_builtin_document_tour_exports() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();

    let summary = Harness::new(dir.path())
        .run(&fixture_backend(), &mut out)
        .await
        .unwrap();

    let json_path = dir.path().join("mongodb_top_movies.json");
    let csv_path = dir.path().join("mongodb_movies.csv");
    assert_eq!(
        summary.exports,
        vec![(json_path.clone(), 6), (csv_path.clone(), 6)]
    );

    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(
        headers,
        vec!["title", "avg_rating", "num_ratings", "num_tags", "genres_str"]
    );
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 6);
    assert_eq!(
        records[0].iter().collect::<Vec<_>>(),
        vec!["Matrix, The (1999)", "4.19", "278", "3", "Action, Sci-Fi, Thriller"]
    );
    assert_eq!(&records[5][0], "GoldenEye (1995)");

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    let movies = json.as_array().unwrap();
    assert_eq!(movies.len(), 6);
    assert_eq!(movies[0]["ratings"]["distribution"]["5.0"], 110);
    assert_eq!(
        movies[0].as_object().unwrap().keys().collect::<Vec<_>>(),
        vec!["title", "genres", "ratings", "tags"]
    );
}

#[tokio::test]
async fn test_failing_export_query_writes_no_files() {
    let toml = format!(
        r#"
[[backends]]
name = "fixture"
kind = "document"
endpoint = "{endpoint}"

[[backends.queries]]
label = "All"
body = '{{"find": {{}}}}'
limit = 2

[[backends.exports]]
path = "good.csv"

[[backends.exports.queries]]
label = "All"
body = '{{"find": {{}}}}'

[[backends.exports.columns]]
name = "title"
field = "title"

[[backends.exports]]
path = "bad.csv"

[[backends.exports.queries]]
label = "Broken"
body = '{{"aggregate": [{{"$lookup": {{}}}}]}}'

[[backends.exports.columns]]
name = "title"
field = "title"
"#,
        endpoint = fixture_endpoint()
    );
    let config = Config::parse_toml(&toml, "test").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();
    let err = Harness::new(dir.path())
        .run(&config.backends[0], &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Query(_)));
    assert!(err.to_string().contains("$lookup"));
    assert!(!dir.path().join("good.csv").exists());
    assert!(!dir.path().join("bad.csv").exists());
}

#[tokio::test]
async fn test_missing_fixture_is_connection_error() {
    let mut backend = fixture_backend();
    backend.connection.endpoint = Some("file:///nonexistent/movies.json".to_string());

    let mut out = Vec::new();
    let err = Harness::new(".").run(&backend, &mut out).await.unwrap_err();
    assert!(matches!(err, HarnessError::Connection(_)));
    assert!(out.is_empty());
}
