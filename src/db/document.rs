//! MongoDB document-store client.
//!
//! Query bodies are JSON objects naming either a `find` filter (with optional
//! `projection` and `sort`) or an `aggregate` pipeline.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::db::{Backend, BackendKind, QueryResult, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;

/// A parsed document query.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentQuery {
    /// `{"find": filter, "projection": {...}, "sort": {...}}`
    Find {
        filter: Map<String, JsonValue>,
        projection: Option<Map<String, JsonValue>>,
        sort: Option<Map<String, JsonValue>>,
    },
    /// `{"aggregate": [stage, ...]}`
    Aggregate { pipeline: Vec<Map<String, JsonValue>> },
}

impl DocumentQuery {
    /// Parses a query body. Exactly one of `find` or `aggregate` must be set.
    pub fn parse(body: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| HarnessError::query(format!("Query body is not valid JSON: {e}")))?;
        let JsonValue::Object(mut object) = value else {
            return Err(HarnessError::query("Query body must be a JSON object"));
        };

        let find = object.remove("find");
        let aggregate = object.remove("aggregate");

        let query = match (find, aggregate) {
            (Some(filter), None) => Self::Find {
                filter: expect_object(filter, "find")?,
                projection: object
                    .remove("projection")
                    .map(|p| expect_object(p, "projection"))
                    .transpose()?,
                sort: object
                    .remove("sort")
                    .map(|s| expect_object(s, "sort"))
                    .transpose()?,
            },
            (None, Some(JsonValue::Array(stages))) => Self::Aggregate {
                pipeline: stages
                    .into_iter()
                    .map(|stage| expect_object(stage, "pipeline stage"))
                    .collect::<Result<_>>()?,
            },
            (None, Some(_)) => {
                return Err(HarnessError::query("'aggregate' must be an array of stages"))
            }
            _ => {
                return Err(HarnessError::query(
                    "Query body must contain exactly one of 'find' or 'aggregate'",
                ))
            }
        };

        if let Some(key) = object.keys().next() {
            return Err(HarnessError::query(format!("Unexpected key '{key}' in query body")));
        }

        Ok(query)
    }
}

fn expect_object(value: JsonValue, what: &str) -> Result<Map<String, JsonValue>> {
    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(HarnessError::query(format!(
            "'{what}' must be a JSON object, got {other}"
        ))),
    }
}

fn to_document(map: &Map<String, JsonValue>) -> Result<Document> {
    bson::to_document(map).map_err(|e| HarnessError::query(format!("Invalid BSON: {e}")))
}

/// Converts documents to rows; columns are the union of top-level keys.
fn rows_from_documents(documents: Vec<Document>) -> QueryResult {
    let records = documents
        .into_iter()
        .map(|document| match Bson::Document(document).into_relaxed_extjson() {
            JsonValue::Object(map) => map
                .into_iter()
                .map(|(key, value)| (key, Value::from_json(value)))
                .collect(),
            _ => Vec::new(),
        })
        .collect();
    QueryResult::from_records(records)
}

/// MongoDB client bound to one database and collection.
pub struct MongoClient {
    client: Mutex<Option<Client>>,
    database: String,
    collection: String,
    timeout: Duration,
}

impl MongoClient {
    /// Connects and pings the server so unreachable or unauthorized
    /// deployments fail here rather than at the first query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let database = config.require_database()?.to_string();
        let collection = config.require_collection()?.to_string();
        let timeout = Duration::from_secs(config.timeout_secs);

        let mut url = config.url_with_credentials()?;
        url.set_path("/");
        if config.user.is_some() {
            let auth_source = config.auth_source.as_deref().unwrap_or("admin");
            url.query_pairs_mut().append_pair("authSource", auth_source);
        }

        let mut options = ClientOptions::parse(url.as_str())
            .await
            .map_err(|e| HarnessError::connection(format!("Invalid MongoDB URL: {e}")))?;
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);
        options.app_name = Some("db-tour".to_string());

        let client = Client::with_options(options)
            .map_err(|e| HarnessError::connection(format!("Invalid MongoDB options: {e}")))?;

        client
            .database(&database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| map_connection_error(e, config))?;

        info!("Connected to MongoDB {database}.{collection}");
        Ok(Self {
            client: Mutex::new(Some(client)),
            database,
            collection,
            timeout,
        })
    }

    async fn run(&self, spec: &QuerySpec, client: &Client) -> Result<Vec<Document>> {
        let collection = client
            .database(&self.database)
            .collection::<Document>(&self.collection);

        let cursor = match DocumentQuery::parse(&spec.body)? {
            DocumentQuery::Find {
                filter,
                projection,
                sort,
            } => {
                let mut find = collection.find(to_document(&filter)?);
                if let Some(projection) = projection {
                    find = find.projection(to_document(&projection)?);
                }
                if let Some(sort) = sort {
                    find = find.sort(to_document(&sort)?);
                }
                if let Some(limit) = spec.limit {
                    find = find.limit(limit as i64);
                }
                find.await
            }
            DocumentQuery::Aggregate { pipeline } => {
                let mut stages = pipeline
                    .iter()
                    .map(to_document)
                    .collect::<Result<Vec<_>>>()?;
                if let Some(limit) = spec.limit {
                    stages.push(doc! { "$limit": limit as i64 });
                }
                collection.aggregate(stages).await
            }
        }
        .map_err(format_query_error)?;

        cursor.try_collect().await.map_err(format_query_error)
    }
}

#[async_trait]
impl Backend for MongoClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| HarnessError::connection("MongoDB client is closed"))?;

        let documents = tokio::time::timeout(self.timeout, self.run(spec, client))
            .await
            .map_err(|_| {
                HarnessError::query(format!(
                    "Query '{}' timed out after {}s",
                    spec.label,
                    self.timeout.as_secs()
                ))
            })??;

        debug!("'{}' returned {} documents", spec.label, documents.len());
        Ok(rows_from_documents(documents))
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client.shutdown().await;
            info!("Closed MongoDB connection");
        }
        Ok(())
    }
}

/// Maps driver errors raised while connecting to user-friendly messages.
fn map_connection_error(e: mongodb::error::Error, config: &ConnectionConfig) -> HarnessError {
    let endpoint = config.endpoint_or_default();
    match *e.kind {
        ErrorKind::Authentication { .. } => HarnessError::connection(format!(
            "Authentication failed for user '{}'. Check your credentials.",
            config.user.as_deref().unwrap_or("")
        )),
        ErrorKind::ServerSelection { .. } => HarnessError::connection(format!(
            "Cannot connect to {endpoint}. Check that MongoDB is running."
        )),
        _ => HarnessError::connection(e.to_string()),
    }
}

fn format_query_error(e: mongodb::error::Error) -> HarnessError {
    match *e.kind {
        ErrorKind::Command(ref command) => {
            HarnessError::query(format!("{} ({})", command.message, command.code_name))
        }
        _ => HarnessError::query(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_find_keeps_sort_order() {
        let query = DocumentQuery::parse(
            r#"{"find": {"genres": "Drama"}, "projection": {"_id": 0, "title": 1},
                "sort": {"ratings.count": -1, "title": 1}}"#,
        )
        .unwrap();

        let DocumentQuery::Find { filter, projection, sort } = query else {
            panic!("expected find");
        };
        assert_eq!(filter.get("genres"), Some(&json!("Drama")));
        assert!(projection.is_some());
        let keys: Vec<&String> = sort.as_ref().unwrap().keys().collect();
        assert_eq!(keys, vec!["ratings.count", "title"]);
    }

    #[test]
    fn test_parse_aggregate() {
        let query = DocumentQuery::parse(
            r#"{"aggregate": [{"$unwind": "$genres"}, {"$limit": 3}]}"#,
        )
        .unwrap();
        match query {
            DocumentQuery::Aggregate { pipeline } => assert_eq!(pipeline.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_ambiguous_or_malformed_bodies() {
        for body in [
            "not json",
            "[1, 2]",
            "{}",
            r#"{"find": {}, "aggregate": []}"#,
            r#"{"aggregate": {"$match": {}}}"#,
            r#"{"find": 3}"#,
            r#"{"find": {}, "limit": 3}"#,
        ] {
            let err = DocumentQuery::parse(body).unwrap_err();
            assert!(matches!(err, HarnessError::Query(_)), "{body}");
        }
    }

    #[test]
    fn test_rows_from_documents_uses_relaxed_json() {
        let documents = vec![
            doc! { "title": "Heat", "ratings": { "average": 3.9, "count": 102_i32 } },
            doc! { "title": "Up", "tags": ["pixar"] },
        ];
        let result = rows_from_documents(documents);

        let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["title", "ratings", "tags"]);
        assert_eq!(
            result.lookup(&result.rows[0], "ratings.count"),
            Some(&Value::Int(102))
        );
        assert_eq!(result.rows[0][2], Value::Null);
    }

    #[tokio::test]
    async fn test_connect_requires_collection() {
        let config = ConnectionConfig {
            kind: BackendKind::Document,
            database: Some("movielens".into()),
            ..Default::default()
        };
        let err = MongoClient::connect(&config).await.err().unwrap();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
