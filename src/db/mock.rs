//! Mock backends for testing.
//!
//! Provides in-memory backends for driving the harness without a server.

use super::{Backend, BackendKind, QueryResult};
use crate::error::{HarnessError, Result};
use crate::query::QuerySpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A mock backend that returns predefined results keyed by query label.
#[derive(Debug, Clone)]
pub struct MockBackend {
    kind: BackendKind,
    results: HashMap<String, std::result::Result<QueryResult, String>>,
    executed: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Creates a mock with no canned results.
    pub fn new() -> Self {
        Self {
            kind: BackendKind::Relational,
            results: HashMap::new(),
            executed: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reports a different backend kind.
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns `result` for queries labelled `label`.
    pub fn with_result(mut self, label: impl Into<String>, result: QueryResult) -> Self {
        self.results.insert(label.into(), Ok(result));
        self
    }

    /// Fails queries labelled `label` with a query error.
    pub fn with_failure(mut self, label: impl Into<String>, message: impl Into<String>) -> Self {
        self.results.insert(label.into(), Err(message.into()));
        self
    }

    /// Shared counter of `close` calls; stays valid after the mock is boxed.
    pub fn closes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    /// Number of queries executed.
    pub fn execute_count(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        match self.results.get(&spec.label) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(HarnessError::query(message.clone())),
            None => Err(HarnessError::query(format!(
                "No canned result for '{}'",
                spec.label
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A backend whose every call fails with a connection error.
#[derive(Debug, Clone, Default)]
pub struct FailingBackend {
    closes: Arc<AtomicUsize>,
}

impl FailingBackend {
    /// Creates a failing backend with a fresh close counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of `close` calls.
    pub fn closes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

#[async_trait]
impl Backend for FailingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn execute(&self, _spec: &QuerySpec) -> Result<QueryResult> {
        Err(HarnessError::connection("connection reset by peer"))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Err(HarnessError::connection("connection already closed"))
    }
}
