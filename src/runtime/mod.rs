//! Runtime driver
//!
//! Translates orchestration intents (start these services, run that task,
//! fetch the logs) into `docker-compose` invocations scoped to one project
//! per test. The [`RuntimeDriver`] trait is the seam the runner works
//! against; [`ComposeDriver`] is the implementation that shells out.

mod compose;
pub mod env;
pub mod output;
pub mod process;
pub mod system;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::config::TaskDefinition;
use crate::common::{Error, Result};

pub use compose::{ComposeDriver, ComposeFactory};
pub use env::TaskEnvironment;
pub use output::OutputSink;
pub use system::SystemDefinition;

/// Default orchestration tool looked up on `PATH`
pub const COMPOSE_TOOL: &str = "docker-compose";

/// Resolved location of the orchestration CLI
///
/// Looked up once and handed to every driver, so tests can point the whole
/// suite at a stand-in binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTool {
    program: PathBuf,
}

impl ComposeTool {
    /// Use `program` as-is, without checking it exists
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Find the tool: an explicit path or name if given, else `docker-compose`
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        let wanted = explicit.unwrap_or(Path::new(COMPOSE_TOOL));

        // Paths with a directory component are taken literally
        if wanted.components().count() > 1 {
            if wanted.is_file() {
                return Ok(Self::new(wanted));
            }
            return Err(Error::RuntimeUnavailable {
                tool: wanted.display().to_string(),
                reason: "file not found".to_string(),
            });
        }

        which::which(wanted)
            .map(Self::new)
            .map_err(|e| Error::RuntimeUnavailable {
                tool: wanted.display().to_string(),
                reason: e.to_string(),
            })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Scoped orchestration commands against the system under test
///
/// Every method blocks until its command completes and observes `cancel`:
/// once the token fires the running command is killed and
/// [`Error::Cancelled`] is returned.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Project name isolating this driver's containers
    fn scope(&self) -> &str;

    /// Pull images, ignoring pull failures of individual images
    async fn pull(&self, cancel: &CancellationToken) -> Result<()>;

    /// Build images, optionally only for one service
    async fn build(&self, service: Option<&str>, cancel: &CancellationToken) -> Result<()>;

    async fn start_all(&self, cancel: &CancellationToken) -> Result<()>;

    async fn stop_all(&self, cancel: &CancellationToken) -> Result<()>;

    async fn start_services(&self, names: &[String], cancel: &CancellationToken) -> Result<()>;

    async fn stop_services(&self, names: &[String], cancel: &CancellationToken) -> Result<()>;

    /// Kill (failure tolerated) then remove the containers and their volumes
    async fn destroy_services(&self, names: &[String], cancel: &CancellationToken)
        -> Result<()>;

    /// Run `task` as a one-off container
    ///
    /// stdout lines are written as `"<prefix> | <line>"`, stderr lines as
    /// `"<task name> | <line>"`. Returns after the process exited and both
    /// streams were drained.
    async fn execute_task(
        &self,
        prefix: &str,
        task: &TaskDefinition,
        env: &TaskEnvironment,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Aggregated logs of every service in the scope
    async fn system_output(&self, cancel: &CancellationToken) -> Result<String>;

    /// Best-effort teardown of the whole scope; never fails
    async fn cleanup(&self);
}

/// Creates one driver per scope
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, scope: &str) -> Result<Box<dyn RuntimeDriver>>;
}

/// Derive a compose project name from a test name
///
/// Compose accepts lowercase letters, digits, `-` and `_`; anything else
/// becomes `_`.
pub fn scope_name(test_name: &str) -> String {
    test_name
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}
