//! Integration test suite for the core model.
//!
//! 1. Versioned schema cache under randomized and concurrent use
//! 2. In-memory collaborators wired as a cluster

pub mod cache_tests;
pub mod memory_tests;
