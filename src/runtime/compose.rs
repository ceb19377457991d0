//! `docker-compose` implementation of the runtime driver

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::env::TaskEnvironment;
use super::output::OutputSink;
use super::process::{run_captured, run_streamed, Deadline, StreamPrefixes};
use super::system::SystemDefinition;
use super::{ComposeTool, RuntimeDriver, RuntimeFactory};
use crate::common::config::TaskDefinition;
use crate::common::Result;

/// Upper bound for each teardown command
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Driver issuing `docker-compose --file <system> --project-name <scope> ...`
pub struct ComposeDriver {
    tool: ComposeTool,
    system: Arc<SystemDefinition>,
    scope: String,
    sink: OutputSink,
}

impl ComposeDriver {
    /// Driver for one scope; an empty scope lets compose pick its default
    /// project, which is what suite-wide image preparation uses.
    pub fn new(
        tool: ComposeTool,
        system: Arc<SystemDefinition>,
        scope: impl Into<String>,
        sink: OutputSink,
    ) -> Self {
        Self {
            tool,
            system,
            scope: scope.into(),
            sink,
        }
    }

    /// Full argument list for `subcommand`
    pub fn args<S: AsRef<str>>(&self, subcommand: &str, extra: &[S]) -> Vec<String> {
        let mut args = vec![
            "--file".to_string(),
            self.system.path().display().to_string(),
        ];
        if !self.scope.is_empty() {
            args.push("--project-name".to_string());
            args.push(self.scope.clone());
        }
        args.push(subcommand.to_string());
        args.extend(extra.iter().map(|s| s.as_ref().to_string()));
        args
    }

    fn command<S: AsRef<str>>(&self, subcommand: &str, extra: &[S]) -> (Command, String) {
        let args = self.args(subcommand, extra);
        let label = format!("{} {}", self.tool.program().display(), args.join(" "));
        let mut cmd = Command::new(self.tool.program());
        cmd.args(&args);
        (cmd, label)
    }

    /// Prefix for output of compose itself (not of a task)
    fn own_prefix(&self) -> &str {
        if self.scope.is_empty() {
            "compose"
        } else {
            &self.scope
        }
    }

    async fn streamed<S: AsRef<str>>(
        &self,
        subcommand: &str,
        extra: &[S],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (cmd, label) = self.command(subcommand, extra);
        run_streamed(
            cmd,
            &label,
            StreamPrefixes::same(self.own_prefix()),
            &self.sink,
            cancel,
        )
        .await
    }

    /// Run a teardown command, logging instead of failing
    async fn best_effort(&self, subcommand: &str, extra: &[&str]) {
        let (cmd, label) = self.command(subcommand, extra);
        let deadline = Deadline::after(TEARDOWN_TIMEOUT);
        if let Err(e) = run_captured(cmd, &label, deadline.token()).await {
            tracing::debug!(scope = %self.scope, "Ignoring teardown failure: {}", e);
        }
    }
}

#[async_trait]
impl RuntimeDriver for ComposeDriver {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn pull(&self, cancel: &CancellationToken) -> Result<()> {
        self.streamed("pull", &["--ignore-pull-failures"], cancel).await
    }

    async fn build(&self, service: Option<&str>, cancel: &CancellationToken) -> Result<()> {
        match service {
            Some(service) => {
                self.system.check_services(&[service])?;
                self.streamed("build", &[service], cancel).await
            }
            None => self.streamed::<&str>("build", &[], cancel).await,
        }
    }

    async fn start_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.streamed("up", &["-d", "--force-recreate"], cancel).await
    }

    async fn stop_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.streamed::<&str>("stop", &[], cancel).await
    }

    async fn start_services(&self, names: &[String], cancel: &CancellationToken) -> Result<()> {
        self.system.check_services(names)?;
        let mut args = vec!["-d".to_string()];
        args.extend(names.iter().cloned());
        self.streamed("up", &args, cancel).await
    }

    async fn stop_services(&self, names: &[String], cancel: &CancellationToken) -> Result<()> {
        self.system.check_services(names)?;
        self.streamed("stop", names, cancel).await
    }

    async fn destroy_services(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.system.check_services(names)?;

        // Already-stopped services make `kill` fail; removal still applies
        if let Err(e) = self.streamed("kill", names, cancel).await {
            if cancel.is_cancelled() {
                return Err(e);
            }
            tracing::debug!(scope = %self.scope, "kill before destroy failed: {}", e);
        }

        let mut args = vec!["-f".to_string(), "-v".to_string()];
        args.extend(names.iter().cloned());
        self.streamed("rm", &args, cancel).await
    }

    async fn execute_task(
        &self,
        prefix: &str,
        task: &TaskDefinition,
        env: &TaskEnvironment,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.system.check_services(&[&task.service])?;

        let mut args = Vec::new();
        for var in env.with_scope(&self.scope) {
            args.push("-e".to_string());
            args.push(var);
        }
        args.push(task.service.clone());
        args.extend(task.command_words());

        let (cmd, label) = self.command("run", &args);
        let prefixes = StreamPrefixes {
            stdout: prefix.to_string(),
            stderr: task.name.clone(),
        };
        run_streamed(cmd, &label, prefixes, &self.sink, cancel).await
    }

    async fn system_output(&self, cancel: &CancellationToken) -> Result<String> {
        let (cmd, label) = self.command("logs", &["--no-color"]);
        run_captured(cmd, &label, cancel).await
    }

    async fn cleanup(&self) {
        tracing::debug!(scope = %self.scope, "Tearing down scope");
        self.best_effort("kill", &[]).await;
        self.best_effort("rm", &["-f", "-v", "-a"]).await;
        self.best_effort("down", &["--volumes", "--remove-orphans"])
            .await;
    }
}

/// Creates [`ComposeDriver`]s sharing one tool, system and sink
#[derive(Clone)]
pub struct ComposeFactory {
    tool: ComposeTool,
    system: Arc<SystemDefinition>,
    sink: OutputSink,
}

impl ComposeFactory {
    pub fn new(tool: ComposeTool, system: SystemDefinition, sink: OutputSink) -> Self {
        Self {
            tool,
            system: Arc::new(system),
            sink,
        }
    }
}

impl RuntimeFactory for ComposeFactory {
    fn create(&self, scope: &str) -> Result<Box<dyn RuntimeDriver>> {
        Ok(Box::new(ComposeDriver::new(
            self.tool.clone(),
            Arc::clone(&self.system),
            scope,
            self.sink.clone(),
        )))
    }
}
