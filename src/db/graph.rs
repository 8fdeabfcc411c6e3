//! Neo4j graph client.
//!
//! Query bodies are Cypher. Each record is deserialized into an ordered map of
//! its projected fields, so `RETURN a AS x, b AS y` yields columns `x`, `y`.
//! Bolt records arrive as hash maps, so the order is recovered from the final
//! `RETURN` clause of the query.

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Row};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::db::{Backend, BackendKind, QueryResult, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;

/// Neo4j client over a bolt connection pool.
pub struct Neo4jClient {
    graph: Mutex<Option<Graph>>,
    timeout: Duration,
}

impl Neo4jClient {
    /// Connects and runs a trivial query to verify the credentials.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint_or_default();

        let mut builder = ConfigBuilder::default()
            .uri(endpoint.as_str())
            .user(config.user.as_deref().unwrap_or("neo4j"))
            .password(config.password.as_deref().unwrap_or(""));
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }
        let neo4j_config = builder
            .build()
            .map_err(|e| HarnessError::config(format!("Invalid Neo4j configuration: {e}")))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let graph = tokio::time::timeout(timeout, Self::open(neo4j_config))
            .await
            .map_err(|_| {
                HarnessError::connection(format!(
                    "Connection to {endpoint} timed out. Check that Neo4j is running."
                ))
            })?
            .map_err(|e| map_connection_error(e, config))?;

        info!("Connected to Neo4j at {endpoint}");
        Ok(Self {
            graph: Mutex::new(Some(graph)),
            timeout,
        })
    }

    async fn open(config: neo4rs::Config) -> std::result::Result<Graph, neo4rs::Error> {
        let graph = Graph::connect(config).await?;
        let mut probe = graph.execute(query("RETURN 1 AS ok")).await?;
        while probe.next().await?.is_some() {}
        Ok(graph)
    }

    /// Reads at most `limit + 1` records so the executor can still report
    /// truncation.
    async fn run(&self, graph: &Graph, spec: &QuerySpec) -> Result<Vec<Vec<(String, Value)>>> {
        let columns = return_columns(&spec.body);
        let mut stream = graph
            .execute(query(&spec.body))
            .await
            .map_err(format_query_error)?;

        let mut records = Vec::new();
        while let Some(row) = stream.next().await.map_err(format_query_error)? {
            records.push(record_fields(&row, &columns)?);
            if spec.limit.is_some_and(|limit| records.len() > limit) {
                break;
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Backend for Neo4jClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let guard = self.graph.lock().await;
        let graph = guard
            .as_ref()
            .ok_or_else(|| HarnessError::connection("Neo4j connection is closed"))?;

        let records = tokio::time::timeout(self.timeout, self.run(graph, spec))
            .await
            .map_err(|_| {
                HarnessError::query(format!(
                    "Query '{}' timed out after {}s",
                    spec.label,
                    self.timeout.as_secs()
                ))
            })??;

        debug!("'{}' returned {} records", spec.label, records.len());
        Ok(QueryResult::from_records(records))
    }

    async fn close(&self) -> Result<()> {
        if self.graph.lock().await.take().is_some() {
            info!("Closed Neo4j connection");
        }
        Ok(())
    }
}

/// Maps driver errors raised while connecting to user-friendly messages.
fn map_connection_error(e: neo4rs::Error, config: &ConnectionConfig) -> HarnessError {
    match e {
        neo4rs::Error::AuthenticationError(_) => HarnessError::connection(format!(
            "Authentication failed for user '{}'. Check your credentials.",
            config.user.as_deref().unwrap_or("neo4j")
        )),
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            HarnessError::connection(format!(
                "Cannot connect to {}. Check that Neo4j is running.",
                config.endpoint_or_default()
            ))
        }
        other => HarnessError::connection(other.to_string()),
    }
}

fn format_query_error(e: neo4rs::Error) -> HarnessError {
    HarnessError::query(e.to_string())
}

/// Decodes a record, ordering its fields by `columns`. Fields the query text
/// did not name (e.g. under `RETURN *`) follow in key order.
fn record_fields(row: &Row, columns: &[String]) -> Result<Vec<(String, Value)>> {
    let mut fields: Map<String, JsonValue> = row
        .to()
        .map_err(|e| HarnessError::query(format!("Cannot decode record: {e}")))?;

    let mut ordered = Vec::with_capacity(fields.len());
    for column in columns {
        if let Some(value) = fields.remove(column) {
            ordered.push((column.clone(), Value::from_json(value)));
        }
    }

    let mut rest: Vec<(String, JsonValue)> = fields.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.extend(rest.into_iter().map(|(key, value)| (key, Value::from_json(value))));
    Ok(ordered)
}

fn return_keyword() -> &'static Regex {
    static RETURN: OnceLock<Regex> = OnceLock::new();
    RETURN.get_or_init(|| {
        Regex::new(r"(?i)\bRETURN\b(?:\s+DISTINCT\b)?").expect("return pattern is valid")
    })
}

fn clause_end() -> &'static Regex {
    static END: OnceLock<Regex> = OnceLock::new();
    END.get_or_init(|| {
        Regex::new(r"(?i)\b(?:ORDER\s+BY|SKIP|LIMIT|UNION)\b").expect("clause pattern is valid")
    })
}

fn alias_pattern() -> &'static Regex {
    static ALIAS: OnceLock<Regex> = OnceLock::new();
    ALIAS.get_or_init(|| {
        Regex::new(r"(?is)^.+\s+AS\s+(`[^`]+`|\w+)$").expect("alias pattern is valid")
    })
}

/// Column names of the last `RETURN` clause, in projection order.
///
/// An item's name is its `AS` alias, else the expression text as written.
/// `RETURN *` or a query without `RETURN` gives an empty list.
fn return_columns(cypher: &str) -> Vec<String> {
    let Some(keyword) = return_keyword().find_iter(cypher).last() else {
        return Vec::new();
    };
    let projection = &cypher[keyword.end()..];
    let clause_ends: HashSet<usize> = clause_end()
        .find_iter(projection)
        .map(|m| m.start())
        .collect();

    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut end = projection.len();

    for (i, c) in projection.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&projection[start..i]);
                start = i + 1;
            }
            _ if depth == 0 && clause_ends.contains(&i) => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    items.push(&projection[start..end]);

    let mut columns = Vec::with_capacity(items.len());
    for item in items.iter().map(|item| item.trim()) {
        if item == "*" {
            return Vec::new();
        }
        if item.is_empty() {
            continue;
        }
        let name = match alias_pattern().captures(item) {
            Some(caps) => caps[1].trim_matches('`').to_string(),
            None => item.to_string(),
        };
        columns.push(name);
    }
    columns
}
