//! In-memory runtime driver for exercising the runner and the suite
//!
//! Every call is appended to a shared journal as `"<scope>: <op> <args>"`.
//! Started services contribute a canned log line so assertions have
//! something to match.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::config::TaskDefinition;
use crate::common::{Error, Result};
use crate::runtime::{RuntimeDriver, RuntimeFactory, TaskEnvironment};

#[derive(Default)]
struct Shared {
    journal: Vec<String>,
    logs: HashMap<String, String>,
}

/// Behaviour knobs shared by every driver a factory creates
#[derive(Clone, Default)]
pub struct Script {
    /// Log line emitted when a service starts, by service name
    pub banners: HashMap<String, String>,
    /// Operations (`"up"`, `"kill"`, `"run"`, ...) that fail
    pub failing: HashSet<String>,
    /// How long each task runs
    pub task_duration: Duration,
    /// Log text appended by each task run, by task name
    pub task_logs: HashMap<String, String>,
    /// Operations that never finish on their own, only on cancellation
    pub hanging: HashSet<String>,
}

#[derive(Clone)]
pub struct RecordingDriver {
    scope: String,
    script: Script,
    shared: Arc<Mutex<Shared>>,
}

impl RecordingDriver {
    fn record(&self, op: &str, args: &[String]) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        let entry = if args.is_empty() {
            format!("{}: {}", self.scope, op)
        } else {
            format!("{}: {} {}", self.scope, op, args.join(" "))
        };
        shared.journal.push(entry);
        if self.script.failing.contains(op) {
            return Err(Error::command_failed(op, "exit status: 1"));
        }
        Ok(())
    }

    async fn hang_if_scripted(&self, op: &str, cancel: &CancellationToken) -> Result<()> {
        if self.script.hanging.contains(op) {
            cancel.cancelled().await;
            return Err(Error::Cancelled(op.to_string()));
        }
        Ok(())
    }

    fn append_log(&self, text: &str) {
        let mut shared = self.shared.lock().unwrap();
        let logs = shared.logs.entry(self.scope.clone()).or_default();
        logs.push_str(text);
        logs.push('\n');
    }
}

#[async_trait]
impl RuntimeDriver for RecordingDriver {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn pull(&self, _cancel: &CancellationToken) -> Result<()> {
        self.record("pull", &[])
    }

    async fn build(&self, service: Option<&str>, _cancel: &CancellationToken) -> Result<()> {
        let args: Vec<String> = service.into_iter().map(str::to_string).collect();
        self.record("build", &args)
    }

    async fn start_all(&self, _cancel: &CancellationToken) -> Result<()> {
        self.record("up-all", &[])
    }

    async fn stop_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.record("stop-all", &[])?;
        self.hang_if_scripted("stop-all", cancel).await
    }

    async fn start_services(&self, names: &[String], _cancel: &CancellationToken) -> Result<()> {
        self.record("up", names)?;
        for name in names {
            if let Some(banner) = self.script.banners.get(name) {
                self.append_log(&format!("{} | {}", name, banner));
            }
        }
        Ok(())
    }

    async fn stop_services(&self, names: &[String], _cancel: &CancellationToken) -> Result<()> {
        self.record("stop", names)
    }

    async fn destroy_services(
        &self,
        names: &[String],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        // Mirrors the compose driver: a failed kill does not stop removal
        let _ = self.record("kill", names);
        self.record("rm", names)
    }

    async fn execute_task(
        &self,
        prefix: &str,
        task: &TaskDefinition,
        env: &TaskEnvironment,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut args = vec![prefix.to_string(), task.service.clone()];
        args.extend(env.with_scope(&self.scope));
        self.record("run", &args)?;

        if !self.script.task_duration.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.script.task_duration) => {}
                _ = cancel.cancelled() => {
                    self.record("killed", &[task.name.clone()])?;
                    return Err(Error::Cancelled(task.name.clone()));
                }
            }
        }
        if let Some(text) = self.script.task_logs.get(&task.name) {
            self.append_log(text);
        }
        Ok(())
    }

    async fn system_output(&self, cancel: &CancellationToken) -> Result<String> {
        self.record("logs", &[])?;
        self.hang_if_scripted("logs", cancel).await?;
        let shared = self.shared.lock().unwrap();
        Ok(shared.logs.get(&self.scope).cloned().unwrap_or_default())
    }

    async fn cleanup(&self) {
        let _ = self.record("cleanup", &[]);
    }
}

/// Factory handing out [`RecordingDriver`]s that share one journal
#[derive(Clone, Default)]
pub struct RecordingFactory {
    script: Script,
    shared: Arc<Mutex<Shared>>,
}

impl RecordingFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            shared: Arc::default(),
        }
    }

    pub fn driver(&self, scope: &str) -> RecordingDriver {
        RecordingDriver {
            scope: scope.to_string(),
            script: self.script.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.shared.lock().unwrap().journal.clone()
    }

    /// Journal entries for one scope, without the scope prefix
    pub fn calls(&self, scope: &str) -> Vec<String> {
        let prefix = format!("{}: ", scope);
        self.journal()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl RuntimeFactory for RecordingFactory {
    fn create(&self, scope: &str) -> Result<Box<dyn RuntimeDriver>> {
        Ok(Box::new(self.driver(scope)))
    }
}
