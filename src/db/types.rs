//! Query result types for db-tour.
//!
//! Defines the structures used to represent query results from every backend.
//! Rows are positional and aligned with the result's column list; nested
//! documents and lists are kept as `Value::Map` and `Value::List`.

use std::fmt;
use std::time::Duration;

/// Represents the result of executing a query against a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column metadata for the result set.
    pub columns: Vec<ColumnInfo>,

    /// Rows of data.
    pub rows: Vec<Row>,

    /// Time taken to execute the query.
    pub execution_time: Duration,

    /// Number of rows in the result (may be truncated).
    pub row_count: usize,

    /// Total number of rows before truncation (if known).
    pub total_rows: Option<usize>,

    /// Whether the result was truncated to the query's row limit.
    pub was_truncated: bool,
}

impl QueryResult {
    /// Creates a new empty query result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query result with the given columns and rows.
    pub fn with_data(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            execution_time: Duration::ZERO,
            row_count,
            total_rows: Some(row_count),
            was_truncated: false,
        }
    }

    /// Builds a result from keyed records whose field sets may differ.
    ///
    /// Columns are the union of all keys in first-appearance order; a record
    /// lacking a column gets `Value::Null` in that position.
    pub fn from_records(records: Vec<Vec<(String, Value)>>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for record in &records {
            for (key, _) in record {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }

        let rows: Vec<Row> = records
            .into_iter()
            .map(|mut record| {
                names
                    .iter()
                    .map(|name| {
                        record
                            .iter()
                            .position(|(key, _)| key == name)
                            .map(|i| record.swap_remove(i).1)
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            })
            .collect();

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let data_type = rows
                    .iter()
                    .map(|row| &row[i])
                    .find(|v| !v.is_null())
                    .map(Value::type_name)
                    .unwrap_or("null");
                ColumnInfo::new(name, data_type)
            })
            .collect();

        Self::with_data(columns, rows)
    }

    /// Sets the execution time.
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.execution_time = duration;
        self
    }

    /// Returns true if the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the position of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolves a dotted field path against one row of this result.
    ///
    /// The longest column name matching a prefix of the path wins, so both
    /// `ratings.average` (nested) and a literal column `ratings.average`
    /// resolve.
    pub fn lookup<'a>(&self, row: &'a Row, path: &str) -> Option<&'a Value> {
        let segments: Vec<&str> = path.split('.').collect();
        for take in (1..=segments.len()).rev() {
            let name = segments[..take].join(".");
            if let Some(value) = self.column_index(&name).and_then(|i| row.get(i)) {
                if let Some(found) = value.lookup_segments(&segments[take..]) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Truncates the rows to `limit`, recording the original count.
    ///
    /// Returns true if rows were dropped.
    pub fn truncate(&mut self, limit: usize) -> bool {
        let total = self.rows.len();
        let dropped = total > limit;
        if dropped {
            self.rows.truncate(limit);
            self.was_truncated = true;
        }
        self.row_count = self.rows.len();
        self.total_rows = Some(self.total_rows.map_or(total, |t| t.max(total)));
        dropped
    }

    /// Returns a truncation warning message if the result was truncated.
    pub fn truncation_warning(&self) -> Option<String> {
        if self.was_truncated {
            let total = self.total_rows.unwrap_or(self.row_count);
            Some(format!(
                "Result truncated: showing {} of {} rows",
                self.row_count, total
            ))
        } else {
            None
        }
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type as reported by the backend.
    pub data_type: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// Represents a single value returned by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// NULL / missing value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Ordered list of values (arrays, graph paths).
    List(Vec<Value>),

    /// Nested document with keys in source order.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's kind, used as column type for schemaless backends.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value of a key if this is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Resolves a dotted path (`ratings.average`, `tags.0`) inside this value.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let segments: Vec<&str> = path.split('.').collect();
        self.lookup_segments(&segments)
    }

    fn lookup_segments(&self, segments: &[&str]) -> Option<&Value> {
        if segments.is_empty() {
            return Some(self);
        }
        match self {
            Value::Map(entries) => {
                // Longest key first: keys such as "5.0" contain the separator.
                for take in (1..=segments.len()).rev() {
                    let key = segments[..take].join(".");
                    if let Some((_, value)) = entries.iter().find(|(k, _)| *k == key) {
                        if let Some(found) = value.lookup_segments(&segments[take..]) {
                            return Some(found);
                        }
                    }
                }
                None
            }
            Value::List(items) => segments[0]
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .and_then(|v| v.lookup_segments(&segments[1..])),
            _ => None,
        }
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_display_string).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.to_display_string()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }

    /// Converts a JSON value, keeping object key order.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts to a JSON value. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

// Conversion implementations for common types
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
