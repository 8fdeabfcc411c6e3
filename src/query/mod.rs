//! Query specifications and execution.
//!
//! A `QuerySpec` is a named, canned query with an optional row limit and
//! presentation hints; the executor runs it against a backend.

mod executor;

pub use executor::{QueryExecutor, QueryOutcome};

use serde::{Deserialize, Serialize};

/// A named query, fixed at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuerySpec {
    /// Human-readable label, printed above the results and usable as `@label`
    /// in export columns.
    pub label: String,

    /// Backend-specific query body: search text, JSON find/aggregate, Cypher or SQL.
    pub body: String,

    /// Maximum number of rows to return.
    #[serde(default)]
    pub limit: Option<usize>,

    /// Line printed before the rows.
    #[serde(default)]
    pub heading: Option<String>,

    /// Template for each row's one-line summary.
    #[serde(default)]
    pub line: Option<String>,

    /// Message printed instead of rows when the query returns nothing.
    #[serde(default)]
    pub empty: Option<String>,
}

impl QuerySpec {
    /// Creates a query with the given label and body.
    pub fn new(label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the line template.
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }
}
