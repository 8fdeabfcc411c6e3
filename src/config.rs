//! Configuration management for db-tour.
//!
//! Handles loading the harness configuration from TOML files, environment
//! overrides for endpoints and credentials, and validation of the query and
//! export lists.

use crate::db::BackendKind;
use crate::error::{HarnessError, Result};
use crate::export::ExportSpec;
use crate::query::QuerySpec;
use crate::render::LineTemplate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration compiled into the binary, used when no config file exists.
pub const BUILTIN_CONFIG: &str = include_str!("../config/movielens.toml");

/// Prefix for per-backend environment overrides.
const ENV_PREFIX: &str = "DBTOUR";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backends in execution order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// One backend: where to connect, what to run, what to export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique name, used on the command line and in env overrides.
    pub name: String,

    /// Connection descriptor.
    #[serde(flatten)]
    pub connection: ConnectionConfig,

    /// Banner printed before the queries.
    #[serde(default)]
    pub title: Option<String>,

    /// Lines printed after a successful run.
    #[serde(default)]
    pub summary: Vec<String>,

    /// Queries rendered to the console, in order.
    #[serde(default)]
    pub queries: Vec<QuerySpec>,

    /// Export files produced after the queries.
    #[serde(default)]
    pub exports: Vec<ExportSpec>,
}

/// Backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConnectionConfig {
    /// Which kind of backend this is.
    pub kind: BackendKind,

    /// Endpoint address (URL). Defaults per backend kind.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// User name.
    #[serde(default)]
    pub user: Option<String>,

    /// Password (prefer the environment override over storing it here).
    #[serde(default)]
    pub password: Option<String>,

    /// Database name.
    #[serde(default)]
    pub database: Option<String>,

    /// Collection name (vector and document backends).
    #[serde(default)]
    pub collection: Option<String>,

    /// Chroma tenant.
    #[serde(default)]
    pub tenant: Option<String>,

    /// MongoDB authentication database.
    #[serde(default)]
    pub auth_source: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Embedding service used by the vector backend to embed query text.
    #[serde(default)]
    pub embedder: Option<EmbedderConfig>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Embedding service settings (Ollama-compatible `/api/embed`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedderConfig {
    /// Base URL of the embedding service.
    #[serde(default = "default_embedder_url")]
    pub url: String,

    /// Embedding model name.
    #[serde(default = "default_embedder_model")]
    pub model: String,
}

fn default_embedder_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedder_model() -> String {
    "all-minilm".to_string()
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            url: default_embedder_url(),
            model: default_embedder_model(),
        }
    }
}

impl ConnectionConfig {
    /// Creates a connection config from a connection URL.
    ///
    /// The scheme selects the backend kind: `http(s)` → vector, `mongodb` →
    /// document, `bolt`/`neo4j` → graph, `postgres(ql)` → relational.
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let url = Url::parse(conn_str)
            .map_err(|e| HarnessError::config(format!("Invalid connection string: {e}")))?;

        let kind = BackendKind::from_scheme(url.scheme()).ok_or_else(|| {
            HarnessError::config(format!(
                "Invalid scheme '{}'. Expected one of http, https, mongodb, bolt, neo4j, postgres",
                url.scheme()
            ))
        })?;

        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or_else(|| kind.default_port());
        let endpoint = format!("{}://{host}:{port}", url.scheme());
        let database = url
            .path()
            .strip_prefix('/')
            .filter(|p| !p.is_empty())
            .map(String::from);
        let user = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };
        let password = url.password().map(String::from);

        Ok(Self {
            kind,
            endpoint: Some(endpoint),
            user,
            password,
            database,
            ..Default::default()
        })
    }

    /// Returns the configured endpoint or the backend's default.
    pub fn endpoint_or_default(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.kind.default_endpoint().to_string())
    }

    /// Parses the endpoint and attaches the configured credentials.
    pub fn url_with_credentials(&self) -> Result<Url> {
        let endpoint = self.endpoint_or_default();
        let mut url = Url::parse(&endpoint)
            .map_err(|e| HarnessError::config(format!("Invalid endpoint '{endpoint}': {e}")))?;

        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| HarnessError::config(format!("Endpoint '{endpoint}' cannot carry credentials")))?;
            if let Some(password) = &self.password {
                url.set_password(Some(password)).map_err(|_| {
                    HarnessError::config(format!("Endpoint '{endpoint}' cannot carry credentials"))
                })?;
            }
        }

        Ok(url)
    }

    /// Returns the database name or an error naming the backend kind.
    pub fn require_database(&self) -> Result<&str> {
        self.database.as_deref().ok_or_else(|| {
            HarnessError::config(format!("Database name is required for {} backends", self.kind))
        })
    }

    /// Returns the collection name or an error naming the backend kind.
    pub fn require_collection(&self) -> Result<&str> {
        self.collection.as_deref().ok_or_else(|| {
            HarnessError::config(format!(
                "Collection name is required for {} backends",
                self.kind
            ))
        })
    }

    /// Applies `DBTOUR_<NAME>_*` environment variables, which take precedence
    /// over values from the config file.
    pub fn apply_env_overrides(&mut self, backend_name: &str) {
        self.apply_overrides(backend_name, |key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, backend_name: &str, lookup: impl Fn(&str) -> Option<String>) {
        let prefix = env_prefix(backend_name);
        let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));

        if let Some(endpoint) = var("ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(user) = var("USER") {
            self.user = Some(user);
        }
        if let Some(password) = var("PASSWORD") {
            self.password = Some(password);
        }
        if let Some(database) = var("DATABASE") {
            self.database = Some(database);
        }
        if let Some(collection) = var("COLLECTION") {
            self.collection = Some(collection);
        }
    }

    /// Returns a display-safe string (no password) for console and logs.
    pub fn display_string(&self) -> String {
        let endpoint = self.endpoint_or_default();
        let target = match (&self.database, &self.collection) {
            (Some(db), Some(coll)) => format!("{db}.{coll}"),
            (Some(db), None) => db.clone(),
            (None, Some(coll)) => coll.clone(),
            (None, None) => "default".to_string(),
        };
        match Url::parse(&endpoint) {
            Ok(url) if url.scheme() == "file" => format!("{} {target} @ {}", self.kind, url.path()),
            Ok(url) => {
                let host = url.host_str().unwrap_or("localhost");
                let port = url.port().unwrap_or_else(|| self.kind.default_port());
                format!("{} {target} @ {host}:{port}", self.kind)
            }
            Err(_) => format!("{} {target} @ {endpoint}", self.kind),
        }
    }
}

/// Environment variable prefix for a backend, e.g. `DBTOUR_MY_GRAPH`.
pub fn env_prefix(backend_name: &str) -> String {
    let name: String = backend_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}_{name}")
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("db-tour")
            .join("config.toml")
    }

    /// Returns the configuration compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::parse_toml(BUILTIN_CONFIG, "built-in configuration")
    }

    /// Resolves the configuration: an explicit path must exist; otherwise the
    /// default path is used if present, else the built-in configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(HarnessError::config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::load_from_file(path)
            }
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from_file(&path)
                } else {
                    Self::builtin()
                }
            }
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, &path.display().to_string())
    }

    /// Parses and validates configuration from a TOML string.
    pub fn parse_toml(content: &str, origin: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| {
            HarnessError::config(format!("Configuration error in {origin}:\n  {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the harness relies on.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(HarnessError::config("Backend name must not be empty"));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(HarnessError::config(format!(
                    "Duplicate backend name '{}'",
                    backend.name
                )));
            }

            for query in &backend.queries {
                validate_query(&backend.name, query)?;
            }

            for export in &backend.exports {
                let context = format!("{} export '{}'", backend.name, export.path.display());
                if export.queries.is_empty() {
                    return Err(HarnessError::config(format!("{context}: no queries")));
                }
                if export.columns.is_empty() {
                    return Err(HarnessError::config(format!("{context}: no columns")));
                }
                let mut columns = HashSet::new();
                for column in &export.columns {
                    if !columns.insert(column.name.as_str()) {
                        return Err(HarnessError::config(format!(
                            "{context}: duplicate column '{}'",
                            column.name
                        )));
                    }
                }
                export.resolved_format()?;
                for query in &export.queries {
                    validate_query(&backend.name, query)?;
                }
            }
        }
        Ok(())
    }

    /// Gets a backend by name.
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Selects backends by name in the order given; all backends if empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<&BackendConfig>> {
        if names.is_empty() {
            return Ok(self.backends.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.backend(name).ok_or_else(|| {
                    HarnessError::config(format!("Backend '{name}' not found in configuration"))
                })
            })
            .collect()
    }
}

fn validate_query(backend: &str, query: &QuerySpec) -> Result<()> {
    if query.label.trim().is_empty() {
        return Err(HarnessError::config(format!(
            "{backend}: query label must not be empty"
        )));
    }
    if query.body.trim().is_empty() {
        return Err(HarnessError::config(format!(
            "{backend}: query '{}' has an empty body",
            query.label
        )));
    }
    if query.limit == Some(0) {
        return Err(HarnessError::config(format!(
            "{backend}: query '{}' has a limit of 0",
            query.label
        )));
    }
    if let Some(line) = &query.line {
        LineTemplate::parse(line).map_err(|e| {
            HarnessError::config(format!("{backend}: query '{}': {e}", query.label))
        })?;
    }
    Ok(())
}
