//! PostgreSQL client.
//!
//! Query bodies are SQL. Only read-only statements are sent to the server;
//! rows are decoded into typed values by column type.

use crate::config::ConnectionConfig;
use crate::db::{collect_limited, Backend, BackendKind, ColumnInfo, QueryResult, Row, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;
use crate::safety;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresClient {
    /// Creates a new PostgresClient from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Opens a small pool; fails if the first connection cannot be made.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut url = config.url_with_credentials()?;
        if let Some(database) = &config.database {
            url.set_path(&format!("/{database}"));
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(timeout)
            .connect(url.as_str())
            .await
            .map_err(|e| map_connection_error(e, config))?;

        info!("Connected to PostgreSQL {}", config.display_string());
        Ok(Self { pool, timeout })
    }
}

#[async_trait]
impl Backend for PostgresClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult> {
        safety::ensure_read_only(&spec.body)?;

        let stream = sqlx::query(&spec.body).fetch(&self.pool);
        let result = tokio::time::timeout(self.timeout, collect_limited(stream, spec.limit))
            .await
            .map_err(|_| {
                HarnessError::query(format!(
                    "Query timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| HarnessError::query(format_query_error(e)))?;

        let columns: Vec<ColumnInfo> = result
            .first()
            .map(|first_row| {
                first_row
                    .columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<Row> = result.iter().map(convert_row).collect();
        debug!("'{}' fetched {} rows", spec.label, rows.len());

        Ok(QueryResult::with_data(columns, rows))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Closed PostgreSQL pool");
        Ok(())
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        "TEXT[]" | "VARCHAR[]" | "NAME[]" => row
            .try_get::<Option<Vec<String>>, _>(index)
            .ok()
            .flatten()
            .map(|items| Value::List(items.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),

        "INT4[]" | "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(index)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<i32>>, _>(index)
                    .ok()
                    .flatten()
                    .map(|items| items.into_iter().map(i64::from).collect())
            })
            .map(|items| Value::List(items.into_iter().map(Value::Int).collect()))
            .unwrap_or(Value::Null),

        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .map(Value::from_json)
            .unwrap_or(Value::Null),

        // NUMERIC needs a cast to float8 in the query; it decodes as NULL here.
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> HarnessError {
    let endpoint = config.endpoint_or_default();
    let target = url::Url::parse(&endpoint)
        .ok()
        .map(|url| {
            format!(
                "{}:{}",
                url.host_str().unwrap_or("localhost"),
                url.port().unwrap_or(BackendKind::Relational.default_port())
            )
        })
        .unwrap_or(endpoint);
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        HarnessError::connection(format!(
            "Cannot connect to {target}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        HarnessError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        HarnessError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        HarnessError::connection(
            "Server requires SSL. Add '?sslmode=require' to the endpoint.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        HarnessError::connection(format!(
            "Connection to {target} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        HarnessError::connection(error.to_string())
    }
}

/// Formats a query error with hints if available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }
        if let Some(column) = pg_error.column() {
            result.push_str("\n  COLUMN: ");
            result.push_str(column);
        }
    }

    result
}
