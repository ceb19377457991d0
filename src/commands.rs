//! CLI command definitions
//!
//! Defines the clap commands for the compose-suite CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::common::config::DEFAULT_DESCRIPTOR;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the tests of a suite descriptor
    Test {
        /// Path to the suite descriptor
        #[arg(short = 'f', long = "file", default_value = DEFAULT_DESCRIPTOR)]
        file: PathBuf,

        /// docker-machine host to run the suite on
        #[arg(short = 'm', long = "machine")]
        machine: Option<String>,

        /// docker-compose executable (default: looked up on PATH)
        #[arg(long)]
        compose: Option<PathBuf>,

        /// Run only the named test(s); can be given multiple times
        #[arg(long = "only")]
        only: Vec<String>,

        /// Write a JSON summary of the run to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}
