//! compose-suite - declarative integration tests for docker-compose systems
//!
//! A suite descriptor lists tasks and tests; each test is an ordered list of
//! steps that start, stop and destroy services, wait, run one-off tasks and
//! check the system's aggregated logs for required and forbidden substrings.

pub mod cli;
pub mod commands;
pub mod common;
pub mod runtime;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
