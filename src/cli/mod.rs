//! CLI command handling
//!
//! Turns a parsed command into a suite run and its exit code.

mod host;

use std::path::PathBuf;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::runtime::{ComposeFactory, ComposeTool, OutputSink, SystemDefinition};
use crate::testing::Suite;

pub use host::prepare_host;

/// Options of the `test` command
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub file: PathBuf,
    pub machine: Option<String>,
    pub compose: Option<PathBuf>,
    pub only: Vec<String>,
    pub report: Option<PathBuf>,
}

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Test {
            file,
            machine,
            compose,
            only,
            report,
        } => {
            run_tests(TestOptions {
                file,
                machine,
                compose,
                only,
                report,
            })
            .await
        }
    }
}

/// Load the descriptor, prepare the host and system, run the suite
///
/// Returns 0 when every test passed and 1 when any failed. Configuration,
/// environment and preparation problems come back as errors.
pub async fn run_tests(opts: TestOptions) -> Result<i32> {
    let mut config = Config::load(&opts.file)?;
    config.select_tests(&opts.only)?;
    tracing::debug!(
        suite = %config.suite.name,
        tests = config.tests.len(),
        tasks = config.tasks.len(),
        "Loaded suite descriptor"
    );

    let tool = ComposeTool::locate(opts.compose.as_deref())?;
    let system = SystemDefinition::load(&config.suite.system)?;
    let host_dir = prepare_host(&opts.file, opts.machine.as_deref(), &config.suite.name).await?;

    let factory = ComposeFactory::new(tool, system, OutputSink::stdout());
    let global_env = Suite::global_environment(&config, &host_dir);
    let summary = Suite::new(&config, global_env).run(&factory).await?;

    if let Some(path) = &opts.report {
        summary.write_json(path)?;
        tracing::info!("Wrote report to {}", path.display());
    }

    Ok(summary.exit_code())
}
