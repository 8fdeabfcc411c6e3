//! Error types for db-tour.
//!
//! Defines the main error enum used throughout the harness.

use thiserror::Error;

/// Main error type for harness operations.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Backend connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (malformed query, backend-side fault, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Export and console output errors (path not writable, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (broken invariants, unexpected states).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an I/O error with the given message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns an error of the same category carrying a different message.
    pub fn with_message(&self, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match self {
            Self::Connection(_) => Self::Connection(msg),
            Self::Query(_) => Self::Query(msg),
            Self::Io(_) => Self::Io(msg),
            Self::Config(_) => Self::Config(msg),
            Self::Internal(_) => Self::Internal(msg),
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Io(_) => "I/O Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using HarnessError.
pub type Result<T> = std::result::Result<T, HarnessError>;
