//! Export of query results to flat records and files.
//!
//! An `ExportSpec` names the queries feeding one output file and the columns
//! projected from every result row. Records of one batch always share the
//! batch's column set.

mod writer;

pub use writer::{write_csv, write_export, write_json};

use crate::db::{QueryResult, Value};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Header row plus one line per record.
    Csv,
    /// Pretty-printed array of objects.
    Json,
}

impl ExportFormat {
    /// Infers the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// One export file and the queries and columns that feed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSpec {
    /// Output path, relative to the output directory.
    pub path: PathBuf,

    /// Output format; inferred from the extension when omitted.
    #[serde(default)]
    pub format: Option<ExportFormat>,

    /// Queries whose rows are appended to the batch, in order.
    pub queries: Vec<QuerySpec>,

    /// Columns projected from every row.
    pub columns: Vec<ColumnSpec>,
}

impl ExportSpec {
    /// Returns the explicit format or the one implied by the file extension.
    pub fn resolved_format(&self) -> Result<ExportFormat> {
        self.format
            .or_else(|| ExportFormat::from_path(&self.path))
            .ok_or_else(|| {
                HarnessError::config(format!(
                    "Cannot infer export format for '{}'; set format = \"csv\" or \"json\"",
                    self.path.display()
                ))
            })
    }

    /// Column names in declared order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// How one export column is derived from a result row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ColumnSpec {
    /// Column name in the output.
    pub name: String,

    /// Row path (`title`, `ratings.average`) or context source: `@label`,
    /// `@body`, `@row`.
    pub field: String,

    /// Round numeric values to this many decimals.
    #[serde(default)]
    pub round: Option<u32>,

    /// Join list items into one string with this separator.
    #[serde(default)]
    pub join: Option<String>,

    /// Replace the value by its length (list items, map entries, characters).
    #[serde(default)]
    pub length: bool,

    /// Value used when the field is missing or null.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl ColumnSpec {
    /// Creates a column reading `field` into `name`.
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            ..Default::default()
        }
    }

    /// Sets the rounding precision.
    pub fn rounded(mut self, decimals: u32) -> Self {
        self.round = Some(decimals);
        self
    }

    /// Derives this column's value for one row.
    fn derive(&self, query: &QuerySpec, result: &QueryResult, index: usize) -> Value {
        let raw = match self.field.as_str() {
            "@label" => Value::from(query.label.as_str()),
            "@body" => Value::from(query.body.as_str()),
            "@row" => Value::from(index + 1),
            path => result
                .lookup(&result.rows[index], path)
                .cloned()
                .unwrap_or(Value::Null),
        };

        let mut value = match (&raw, &self.default) {
            (Value::Null, Some(default)) => Value::from_json(default.clone()),
            _ => raw,
        };

        if self.length {
            value = match &value {
                Value::List(items) => Value::from(items.len()),
                Value::Map(entries) => Value::from(entries.len()),
                Value::String(s) => Value::from(s.chars().count()),
                Value::Null => Value::Int(0),
                _ => value,
            };
        }

        if let (Some(separator), Value::List(items)) = (&self.join, &value) {
            let joined: Vec<String> = items.iter().map(Value::to_display_string).collect();
            value = Value::String(joined.join(separator));
        }

        if let Some(decimals) = self.round {
            if let Some(number) = value.as_f64() {
                value = Value::Float(round_to(number, decimals));
            }
        }

        value
    }
}

/// Rounds to a fixed number of decimals, half away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// A flat record: column name to value, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportRecord {
    fields: Vec<(String, Value)>,
}

impl ExportRecord {
    /// Creates a record from ordered fields.
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Column names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Values in column order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    /// Looks up a value by column name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Records destined for one output file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportBatch {
    columns: Vec<String>,
    records: Vec<ExportRecord>,
}

impl ExportBatch {
    /// Creates an empty batch with a fixed column order.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            records: Vec::new(),
        }
    }

    /// Column names in declared order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[ExportRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record whose keys must equal the batch columns, in order.
    pub fn push(&mut self, record: ExportRecord) -> Result<()> {
        if !record.keys().eq(self.columns.iter().map(String::as_str)) {
            let keys: Vec<&str> = record.keys().collect();
            return Err(HarnessError::internal(format!(
                "Export record keys {keys:?} do not match batch columns {:?}",
                self.columns
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Appends all records.
    pub fn extend(&mut self, records: Vec<ExportRecord>) -> Result<()> {
        records.into_iter().try_for_each(|record| self.push(record))
    }
}

/// Projects every row of a result into an export record.
///
/// Produces exactly one record per row.
pub fn project(
    columns: &[ColumnSpec],
    query: &QuerySpec,
    result: &QueryResult,
) -> Vec<ExportRecord> {
    (0..result.rows.len())
        .map(|index| {
            ExportRecord::new(
                columns
                    .iter()
                    .map(|column| (column.name.clone(), column.derive(query, result, index)))
                    .collect(),
            )
        })
        .collect()
}
