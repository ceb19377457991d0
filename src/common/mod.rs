//! Common utilities shared by the CLI, the runtime driver and the runner

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};

/// Prefix for every variable compose-suite injects into task containers
pub const ENV_PREFIX: &str = "COMPOSE_SUITE";
