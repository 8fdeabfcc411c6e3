//! Query execution with row-limit enforcement.
//!
//! Provides isolated query execution that can be tested independently
//! of the harness.

use std::time::Instant;

use tracing::{debug, warn};

use crate::db::{Backend, QueryResult};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;

/// Runs query specifications against one backend.
pub struct QueryExecutor<'a> {
    backend: &'a dyn Backend,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new query executor.
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Executes a query and enforces its row limit.
    ///
    /// Backend failures surface as `Query` errors, except connection errors,
    /// which keep their category.
    pub async fn execute(&self, spec: &QuerySpec) -> Result<QueryOutcome> {
        debug!(
            "Executing '{}' on {} backend: {}",
            spec.label,
            self.backend.kind(),
            spec.body
        );

        let start = Instant::now();
        let result = self.backend.execute(spec).await;
        let execution_time = start.elapsed();

        let mut result = match result {
            Ok(result) => result,
            Err(e @ HarnessError::Connection(_)) | Err(e @ HarnessError::Query(_)) => {
                return Err(e)
            }
            Err(e) => {
                return Err(HarnessError::query(format!(
                    "'{}' failed: {e}",
                    spec.label
                )))
            }
        };

        if let Some(limit) = spec.limit {
            result.truncate(limit);
            if let Some(warning) = result.truncation_warning() {
                warn!("'{}': {warning}", spec.label);
            }
        }

        debug!(
            "'{}' returned {} rows in {:?}",
            spec.label, result.row_count, execution_time
        );

        Ok(QueryOutcome {
            result: result.with_execution_time(execution_time),
        })
    }
}

/// Successful query execution outcome.
#[derive(Debug)]
pub struct QueryOutcome {
    /// The query result, with its execution time recorded.
    pub result: QueryResult,
}
