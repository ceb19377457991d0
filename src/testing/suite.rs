//! Suite controller
//!
//! Prepares the system once, then runs every test strictly one after the
//! other, each in its own scope. Passing tests have their scope torn down;
//! failing tests keep theirs for inspection.

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::{Error, Result, ENV_PREFIX};
use crate::runtime::{scope_name, RuntimeFactory, TaskEnvironment};

use super::report::SuiteSummary;
use super::runner::TestRunner;

pub struct Suite<'a> {
    config: &'a Config,
    global_env: TaskEnvironment,
}

impl<'a> Suite<'a> {
    pub fn new(config: &'a Config, global_env: TaskEnvironment) -> Self {
        Self { config, global_env }
    }

    /// Global task variables: the host sync directory, then `suite.env`
    pub fn global_environment(config: &Config, host_dir: &std::path::Path) -> TaskEnvironment {
        let mut env = TaskEnvironment::new(vec![format!(
            "{}_HOST_DIR={}",
            ENV_PREFIX,
            host_dir.display()
        )]);
        for var in &config.suite.env {
            env.push(var.clone());
        }
        env
    }

    /// Pull and build images for the system
    ///
    /// Failures here are fatal: no test can run against a system that
    /// failed to build.
    pub async fn prepare(&self, factory: &dyn RuntimeFactory) -> Result<()> {
        let suite = &self.config.suite;
        let driver = factory.create("")?;
        let cancel = CancellationToken::new();

        println!("{} {}", "Pulling images for system".cyan(), suite.name.bold());
        driver
            .pull(&cancel)
            .await
            .map_err(|e| Error::Preparation(format!("Error pulling images: {}", e)))?;

        println!("{} {}", "Building images for system".cyan(), suite.name.bold());
        let only = if suite.only_build_task {
            suite.task_service.as_deref()
        } else {
            None
        };
        driver
            .build(only, &cancel)
            .await
            .map_err(|e| Error::Preparation(format!("Could not build system: {}", e)))?;

        Ok(())
    }

    /// Prepare the system and run every test
    pub async fn run(&self, factory: &dyn RuntimeFactory) -> Result<SuiteSummary> {
        self.prepare(factory).await?;
        self.run_tests(factory).await
    }

    /// Run every test against an already prepared system
    pub async fn run_tests(&self, factory: &dyn RuntimeFactory) -> Result<SuiteSummary> {
        println!(
            "\n{} {}",
            "Running Test Suite for System".blue().bold(),
            self.config.suite.name.white().bold()
        );

        let mut summary = SuiteSummary::new(&self.config.suite.name);
        for test in &self.config.tests {
            let scope = scope_name(&test.name);
            let driver = factory.create(&scope)?;
            tracing::info!(test = %test.name, scope = %scope, "Running test");
            println!("\n{} {}", "Running test".blue(), test.name.white().bold());

            let runner = TestRunner::new(test, &self.config.tasks, &self.global_env);
            let report = runner.run(driver.as_ref()).await;

            if report.success {
                driver.cleanup().await;
                println!("{} {}", "✓".green().bold(), format!("Test {} Succeeded!", test.name).green());
            } else {
                println!(
                    "{} {}\n{}\n{}",
                    "✗".red().bold(),
                    format!("Test {} Failed!", test.name).red(),
                    "Runtime Output:".yellow(),
                    report.system_output()
                );
            }
            summary.record(report);
        }

        print_summary(&summary);
        Ok(summary)
    }
}

fn print_summary(summary: &SuiteSummary) {
    println!(
        "\n\n{}\n{} tests succeeded\n{} tests failed",
        "SUMMARY:".bold(),
        summary.succeeded.len(),
        summary.failed.len()
    );
}
