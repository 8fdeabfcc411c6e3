//! Integration tests for db-tour.

pub mod document_test;
pub mod graph_test;
pub mod harness_test;
pub mod relational_test;
pub mod vector_test;
