//! compose-suite - declarative integration tests for docker-compose systems
//!
//! Exit codes: 0 when every test passed, 1 when any test failed, 2 for
//! configuration, environment or preparation errors.

use clap::Parser;
use compose_suite::{cli, commands::Commands, common::logging};

#[derive(Parser)]
#[command(name = "compose-suite", about = "Run integration test suites against docker-compose systems")]
#[command(version, long_about = None)]
struct Cli {
    /// Log every issued command
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    let code = match cli::dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    std::process::exit(code);
}
