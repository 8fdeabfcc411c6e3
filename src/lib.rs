//! db-tour - runs the same canned query-and-export tour against vector,
//! document, graph and relational databases.
//!
//! This library exposes the core modules for the binary and integration tests.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod harness;
pub mod query;
pub mod render;
pub mod safety;
