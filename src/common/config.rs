//! Suite descriptor handling
//!
//! The descriptor is a YAML file declaring the system under test, the task
//! catalog and the tests. Loading resolves every relative path against the
//! descriptor's directory and every step timeout into a concrete duration, so
//! nothing downstream needs to know about defaults.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Error, Result};
use crate::runtime::scope_name;

/// Step timeout used when a step does not declare one, in time units
pub const DEFAULT_TIMEOUT_UNITS: u64 = 60;

/// Default descriptor file name, looked up in the working directory
pub const DEFAULT_DESCRIPTOR: &str = "compose-suite.yml";

/// Resolve a step's raw timeout into a duration
///
/// Unspecified (or zero) timeouts fall back to [`DEFAULT_TIMEOUT_UNITS`].
pub fn resolve_timeout(raw: Option<u64>, unit: Duration) -> Duration {
    match raw {
        None | Some(0) => unit_multiple(DEFAULT_TIMEOUT_UNITS, unit),
        Some(units) => unit_multiple(units, unit),
    }
}

/// Parse a wait duration such as `500ms`, `2s`, `1m30s`
///
/// A bare number counts time units.
pub fn parse_duration(text: &str, unit: Duration) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Config("empty duration".to_string()));
    }
    if let Ok(units) = text.parse::<u64>() {
        return Ok(unit_multiple(units, unit));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::Config(format!("duration '{}' is missing a unit", text)))?;
        if digits == 0 {
            return Err(Error::Config(format!("invalid duration '{}'", text)));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| Error::Config(format!("invalid duration '{}'", text)))?;
        rest = &rest[digits..];
        let suffix_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..suffix_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            other => {
                return Err(Error::Config(format!(
                    "unknown duration unit '{}' in '{}'",
                    other, text
                )))
            }
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| Error::Config(format!("duration '{}' is too large", text)))?;
        rest = &rest[suffix_len..];
    }
    Ok(total)
}

// === Raw descriptor (as written in YAML) ===

#[derive(Deserialize, Debug)]
struct RawDescriptor {
    suite: RawSuite,
    #[serde(default)]
    tasks: Vec<RawTask>,
    #[serde(default)]
    tests: Vec<RawTest>,
}

#[derive(Deserialize, Debug)]
struct RawSuite {
    name: String,
    system: PathBuf,
    task_service: Option<String>,
    #[serde(default)]
    only_build_task: bool,
    time_unit_ms: Option<u64>,
    #[serde(default)]
    env: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct RawTask {
    name: String,
    command: String,
    service: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawTest {
    name: String,
    #[serde(default)]
    before_startup: Vec<String>,
    #[serde(default)]
    spec: Vec<RawStep>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct RawStep {
    #[serde(default)]
    start: Vec<String>,
    #[serde(default)]
    stop: Vec<String>,
    #[serde(default)]
    destroy: Vec<String>,
    wait: Option<RawWait>,
    #[serde(default)]
    exec: Vec<TaskInvocation>,
    #[serde(default)]
    assert: Vec<String>,
    #[serde(default)]
    fail: Vec<String>,
    timeout: Option<u64>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawWait {
    Units(u64),
    Text(String),
}

// === Resolved configuration ===

/// A fully loaded and validated suite descriptor
#[derive(Debug, Clone)]
pub struct Config {
    pub suite: SuiteConfig,
    pub tasks: TaskCatalog,
    pub tests: Vec<TestSpec>,
    /// Path the descriptor was loaded from
    pub path: PathBuf,
}

/// Suite identity and system location
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub name: String,
    /// Compose file, resolved against the descriptor directory
    pub system: PathBuf,
    /// Service that tasks run in unless they name their own
    pub task_service: Option<String>,
    /// Build only the task service during preparation
    pub only_build_task: bool,
    /// Length of one time unit in timeouts and bare waits
    pub time_unit: Duration,
    /// Variables passed to every task
    pub env: Vec<String>,
}

/// A named one-off command bound to a target service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub service: String,
    pub command: String,
}

impl TaskDefinition {
    /// Command words as passed to the container, split on single spaces
    pub fn command_words(&self) -> Vec<String> {
        self.command.split(' ').map(str::to_string).collect()
    }
}

/// Task definitions by name
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: HashMap<String, TaskDefinition>,
}

impl TaskCatalog {
    pub fn new(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// One `exec` entry: a task name, optionally with call-site variables
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TaskInvocation {
    Name(String),
    WithEnv {
        task: String,
        #[serde(default)]
        env: Vec<String>,
    },
}

impl TaskInvocation {
    pub fn task(&self) -> &str {
        match self {
            TaskInvocation::Name(name) => name,
            TaskInvocation::WithEnv { task, .. } => task,
        }
    }

    pub fn env(&self) -> &[String] {
        match self {
            TaskInvocation::Name(_) => &[],
            TaskInvocation::WithEnv { env, .. } => env,
        }
    }
}

/// A named test: optional pre-startup services and an ordered step list
#[derive(Debug, Clone, Default)]
pub struct TestSpec {
    pub name: String,
    pub before_startup: Vec<String>,
    pub steps: Vec<Step>,
}

/// One ordered unit of a test
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub start: Vec<String>,
    pub stop: Vec<String>,
    pub destroy: Vec<String>,
    pub wait: Option<Duration>,
    pub exec: Vec<TaskInvocation>,
    pub assert: Vec<String>,
    pub fail: Vec<String>,
    /// Bound on the whole step, including log capture and evaluation
    pub timeout: Duration,
}

impl Config {
    /// Load and validate a descriptor from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        Self::from_yaml(&content, path)
    }

    /// Parse and validate descriptor content; `path` anchors relative paths
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let raw: RawDescriptor =
            serde_yaml::from_str(content).map_err(|e| Error::config_parse(path, e))?;

        if raw.suite.name.trim().is_empty() {
            return Err(Error::config_parse(path, "suite.name must not be empty"));
        }
        if raw.suite.system.as_os_str().is_empty() {
            return Err(Error::config_parse(path, "suite.system must not be empty"));
        }
        if raw.suite.only_build_task && raw.suite.task_service.is_none() {
            return Err(Error::config_parse(
                path,
                "suite.only_build_task requires suite.task_service",
            ));
        }

        let time_unit = match raw.suite.time_unit_ms {
            Some(0) => return Err(Error::config_parse(path, "suite.time_unit_ms must be > 0")),
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(1),
        };

        let base_dir = path.parent().unwrap_or(Path::new("."));
        let system = base_dir.join(&raw.suite.system);

        let mut task_names = HashSet::new();
        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for task in raw.tasks {
            if !task_names.insert(task.name.clone()) {
                return Err(Error::config_parse(
                    path,
                    format!("task '{}' is defined more than once", task.name),
                ));
            }
            let service = task
                .service
                .or_else(|| raw.suite.task_service.clone())
                .ok_or_else(|| {
                    Error::config_parse(
                        path,
                        format!(
                            "task '{}' has no service and suite.task_service is not set",
                            task.name
                        ),
                    )
                })?;
            tasks.push(TaskDefinition {
                name: task.name,
                service,
                command: task.command,
            });
        }

        // Scope -> test name; distinct names may still map to one project
        let mut scopes: HashMap<String, String> = HashMap::new();
        let mut tests = Vec::with_capacity(raw.tests.len());
        for test in raw.tests {
            if let Some(other) = scopes.insert(scope_name(&test.name), test.name.clone()) {
                let reason = if other == test.name {
                    format!("test '{}' is defined more than once", test.name)
                } else {
                    format!(
                        "tests '{}' and '{}' share the compose project '{}'",
                        other,
                        test.name,
                        scope_name(&test.name)
                    )
                };
                return Err(Error::config_parse(path, reason));
            }
            let mut steps = Vec::with_capacity(test.spec.len());
            for (i, step) in test.spec.into_iter().enumerate() {
                for invocation in &step.exec {
                    if !task_names.contains(invocation.task()) {
                        return Err(Error::config_parse(
                            path,
                            format!(
                                "test '{}' step {} runs unknown task '{}'",
                                test.name,
                                i + 1,
                                invocation.task()
                            ),
                        ));
                    }
                }
                let wait = match step.wait {
                    None => None,
                    Some(RawWait::Units(units)) => Some(unit_multiple(units, time_unit)),
                    Some(RawWait::Text(text)) => Some(parse_duration(&text, time_unit).map_err(
                        |e| {
                            Error::config_parse(
                                path,
                                format!("test '{}' step {}: {}", test.name, i + 1, e),
                            )
                        },
                    )?),
                };
                steps.push(Step {
                    start: step.start,
                    stop: step.stop,
                    destroy: step.destroy,
                    wait,
                    exec: step.exec,
                    assert: step.assert,
                    fail: step.fail,
                    timeout: resolve_timeout(step.timeout, time_unit),
                });
            }
            tests.push(TestSpec {
                name: test.name,
                before_startup: test.before_startup,
                steps,
            });
        }

        Ok(Self {
            suite: SuiteConfig {
                name: raw.suite.name,
                system,
                task_service: raw.suite.task_service,
                only_build_task: raw.suite.only_build_task,
                time_unit,
                env: raw.suite.env,
            },
            tasks: TaskCatalog::new(tasks),
            tests,
            path: path.to_path_buf(),
        })
    }

    /// Keep only the named tests, in descriptor order
    pub fn select_tests(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.tests.iter().any(|t| &t.name == name) {
                return Err(Error::Config(format!("No test named '{}'", name)));
            }
        }
        self.tests.retain(|t| names.contains(&t.name));
        Ok(())
    }
}

fn unit_multiple(units: u64, unit: Duration) -> Duration {
    unit.saturating_mul(units.min(u32::MAX as u64) as u32)
}
