//! Backend abstraction layer for db-tour.
//!
//! Provides a trait-based interface over the four supported database kinds,
//! allowing the harness to drive any of them through the same calls.

mod document;
mod graph;
mod memory;
mod mock;
mod relational;
mod types;
mod vector;

pub use document::{DocumentQuery, MongoClient};
pub use graph::Neo4jClient;
pub use memory::MemoryDocumentStore;
pub use mock::{FailingBackend, MockBackend};
pub use relational::PostgresClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};
pub use vector::{distance_to_similarity, rows_from_response, ChromaClient, ChromaQueryResponse};

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::query::QuerySpec;
use crate::render;
use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt;
use tracing::info;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedding store answering nearest-neighbour queries (Chroma).
    Vector,
    /// Document store queried with filters and pipelines (MongoDB).
    Document,
    /// Graph store queried with Cypher (Neo4j).
    Graph,
    /// SQL database (PostgreSQL).
    #[default]
    Relational,
}

impl BackendKind {
    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Document => "document",
            Self::Graph => "graph",
            Self::Relational => "relational",
        }
    }

    /// Parses a kind from a string, accepting product names as aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vector" | "chroma" | "chromadb" => Some(Self::Vector),
            "document" | "mongo" | "mongodb" => Some(Self::Document),
            "graph" | "neo4j" => Some(Self::Graph),
            "relational" | "postgres" | "postgresql" => Some(Self::Relational),
            _ => None,
        }
    }

    /// Maps a URL scheme to the backend kind it addresses.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" | "https" => Some(Self::Vector),
            "mongodb" | "mongodb+srv" => Some(Self::Document),
            "bolt" | "neo4j" | "neo4j+s" | "bolt+s" => Some(Self::Graph),
            "postgres" | "postgresql" => Some(Self::Relational),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Vector => 8000,
            Self::Document => 27017,
            Self::Graph => 7687,
            Self::Relational => 5432,
        }
    }

    /// Returns the URL scheme for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Vector => "http",
            Self::Document => "mongodb",
            Self::Graph => "bolt",
            Self::Relational => "postgres",
        }
    }

    /// Returns the endpoint used when none is configured.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Vector => "http://localhost:8000",
            Self::Document => "mongodb://localhost:27017",
            Self::Graph => "bolt://localhost:7687",
            Self::Relational => "postgres://localhost:5432",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates a backend client for the given configuration.
///
/// This is the central factory function for backend connections. Document
/// backends with a `file://` endpoint are served from a local JSON fixture.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Backend>> {
    info!("Connecting to {}", config.display_string());
    let backend: Box<dyn Backend> = match config.kind {
        BackendKind::Vector => Box::new(ChromaClient::connect(config).await?),
        BackendKind::Document => {
            let endpoint = config.endpoint_or_default();
            match endpoint.strip_prefix("file://") {
                Some(path) => Box::new(MemoryDocumentStore::from_file(path)?),
                None => Box::new(MongoClient::connect(config).await?),
            }
        }
        BackendKind::Graph => Box::new(Neo4jClient::connect(config).await?),
        BackendKind::Relational => Box::new(PostgresClient::connect(config).await?),
    };
    Ok(backend)
}

/// Trait defining the interface for backend clients.
///
/// All I/O is async and returns Results with HarnessError.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The kind of backend behind this client.
    fn kind(&self) -> BackendKind;

    /// Executes one query and returns its rows in the backend's native order.
    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult>;

    /// Formats a result as console lines, one per row.
    fn render(&self, spec: &QuerySpec, result: &QueryResult) -> Result<Vec<String>> {
        render::render_result(spec, result)
    }

    /// Releases backend resources.
    async fn close(&self) -> Result<()>;
}

/// Drains a row stream, stopping after `limit + 1` items.
///
/// The extra row lets the executor see that the limit was exceeded and
/// report the truncation.
pub(crate) async fn collect_limited<S, T, E>(
    stream: S,
    limit: Option<usize>,
) -> std::result::Result<Vec<T>, E>
where
    S: Stream<Item = std::result::Result<T, E>>,
{
    match limit {
        Some(limit) => stream.take(limit.saturating_add(1)).try_collect().await,
        None => stream.try_collect().await,
    }
}
