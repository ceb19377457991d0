//! Step executor
//!
//! Drives one test's steps against a runtime driver. Within a step the
//! actions always run in the same order (start, stop, destroy, wait, exec,
//! evaluate) whichever lists are populated, and the whole step, log capture
//! included, runs under the step's deadline.

use std::time::Duration;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::common::config::{resolve_timeout, Step, TaskCatalog, TestSpec};
use crate::common::Error;
use crate::runtime::process::Deadline;
use crate::runtime::{RuntimeDriver, TaskEnvironment};

use super::report::{StepFailure, TestReport};

/// Where the executor is in a test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    Starting,
    Stopping,
    Destroying,
    Waiting,
    Executing,
    Evaluating,
    Passed,
    Failed,
}

/// Runs one test
pub struct TestRunner<'a> {
    test: &'a TestSpec,
    tasks: &'a TaskCatalog,
    global_env: &'a TaskEnvironment,
}

impl<'a> TestRunner<'a> {
    pub fn new(test: &'a TestSpec, tasks: &'a TaskCatalog, global_env: &'a TaskEnvironment) -> Self {
        Self {
            test,
            tasks,
            global_env,
        }
    }

    /// Execute the test and produce its report
    ///
    /// On success the scope's services are stopped. On failure nothing is
    /// torn down and the system output is captured into the report.
    pub async fn run(&self, driver: &dyn RuntimeDriver) -> TestReport {
        let steps_total = self.test.steps.len();
        self.enter(0, Phase::Idle);

        if let Err(failure) = self.prepare(driver).await {
            return self.fail(driver, 0, failure).await;
        }

        for (i, step) in self.test.steps.iter().enumerate() {
            let step_num = i + 1;
            match self.run_step_with_deadline(step_num, step, driver).await {
                Ok(()) => {
                    println!("  {} Step {}: {}", "✓".green(), step_num, describe(step).dimmed());
                }
                Err(failure) => return self.fail(driver, step_num, failure).await,
            }
        }

        let deadline = Deadline::after(self.housekeeping_timeout());
        if let Err(e) = driver.stop_all(deadline.token()).await {
            tracing::warn!(test = %self.test.name, "Failed to stop services after success: {}", e);
        }
        self.enter(steps_total, Phase::Passed);
        TestReport::passed(&self.test.name, steps_total)
    }

    async fn prepare(&self, driver: &dyn RuntimeDriver) -> Result<(), StepFailure> {
        if self.test.before_startup.is_empty() {
            return Ok(());
        }
        self.enter(0, Phase::Preparing);
        let deadline = Deadline::after(self.housekeeping_timeout());
        driver
            .start_services(&self.test.before_startup, deadline.token())
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        driver: &dyn RuntimeDriver,
        step_num: usize,
        failure: StepFailure,
    ) -> TestReport {
        self.enter(step_num, Phase::Failed);
        println!("  {} Step {}: {}", "✗".red(), step_num, failure);

        let deadline = Deadline::after(self.housekeeping_timeout());
        let system_output = match driver.system_output(deadline.token()).await {
            Ok(output) => output,
            Err(e) => format!("<could not capture system output: {}>", e),
        };
        TestReport::failed(
            &self.test.name,
            step_num,
            self.test.steps.len(),
            &failure,
            system_output,
        )
    }

    /// Run a step, cancelling whatever is in flight when its timeout expires
    async fn run_step_with_deadline(
        &self,
        step_num: usize,
        step: &Step,
        driver: &dyn RuntimeDriver,
    ) -> Result<(), StepFailure> {
        let deadline = Deadline::after(step.timeout);
        let result = self.run_step(step_num, step, driver, deadline.token()).await;

        // A step that overran is a timeout even if its last action completed
        if deadline.expired() {
            return Err(StepFailure::Timeout(step.timeout));
        }
        result
    }

    /// Bound for work outside any step: before_startup, the final stop and
    /// the failure snapshot
    fn housekeeping_timeout(&self) -> Duration {
        self.test
            .steps
            .last()
            .map(|step| step.timeout)
            .unwrap_or_else(|| resolve_timeout(None, Duration::from_secs(1)))
    }

    async fn run_step(
        &self,
        step_num: usize,
        step: &Step,
        driver: &dyn RuntimeDriver,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        if !step.start.is_empty() {
            self.enter(step_num, Phase::Starting);
            driver.start_services(&step.start, cancel).await?;
        }
        if !step.stop.is_empty() {
            self.enter(step_num, Phase::Stopping);
            driver.stop_services(&step.stop, cancel).await?;
        }
        if !step.destroy.is_empty() {
            self.enter(step_num, Phase::Destroying);
            driver.destroy_services(&step.destroy, cancel).await?;
        }
        if let Some(wait) = step.wait {
            self.enter(step_num, Phase::Waiting);
            pause(wait, cancel).await?;
        }
        for invocation in &step.exec {
            self.enter(step_num, Phase::Executing);
            let task = self
                .tasks
                .get(invocation.task())
                .ok_or_else(|| Error::UnknownTask(invocation.task().to_string()))?;
            let env = TaskEnvironment::resolve(self.global_env, invocation.env());
            driver.execute_task(&task.name, task, &env, cancel).await?;
        }
        if !step.assert.is_empty() || !step.fail.is_empty() {
            self.enter(step_num, Phase::Evaluating);
            let output = driver.system_output(cancel).await?;
            evaluate(&output, &step.assert, &step.fail)?;
        }
        Ok(())
    }

    fn enter(&self, step_num: usize, phase: Phase) {
        tracing::debug!(test = %self.test.name, step = step_num, phase = ?phase, "enter");
    }
}

/// Sleep for `duration` unless the step is cancelled first
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), StepFailure> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled("wait".to_string()).into()),
    }
}

/// Check captured output against a step's predicates
///
/// A forbidden substring fails the step regardless of the assertions; only
/// when none is present do missing assertions count.
pub fn evaluate(output: &str, assert: &[String], fail: &[String]) -> Result<(), StepFailure> {
    let found: Vec<String> = fail
        .iter()
        .filter(|pattern| output.contains(pattern.as_str()))
        .cloned()
        .collect();
    if !found.is_empty() {
        return Err(StepFailure::ForbiddenPattern { found });
    }

    let missing: Vec<String> = assert
        .iter()
        .filter(|pattern| !output.contains(pattern.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(StepFailure::Assertion { missing });
    }
    Ok(())
}

/// One-line summary of a step for the progress output
fn describe(step: &Step) -> String {
    let mut parts = Vec::new();
    if !step.start.is_empty() {
        parts.push(format!("start {}", step.start.join(",")));
    }
    if !step.stop.is_empty() {
        parts.push(format!("stop {}", step.stop.join(",")));
    }
    if !step.destroy.is_empty() {
        parts.push(format!("destroy {}", step.destroy.join(",")));
    }
    if let Some(wait) = step.wait {
        parts.push(format!("wait {:?}", wait));
    }
    if !step.exec.is_empty() {
        let names: Vec<&str> = step.exec.iter().map(|i| i.task()).collect();
        parts.push(format!("exec {}", names.join(",")));
    }
    if !step.assert.is_empty() || !step.fail.is_empty() {
        parts.push(format!(
            "check {} assert / {} fail",
            step.assert.len(),
            step.fail.len()
        ));
    }
    if parts.is_empty() {
        "no-op".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::{TaskDefinition, TaskInvocation};
    use crate::testing::recording::{RecordingFactory, Script};
    use crate::testing::report::FailureKind;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn step() -> Step {
        Step {
            timeout: Duration::from_secs(5),
            ..Step::default()
        }
    }

    fn catalog() -> TaskCatalog {
        TaskCatalog::new([
            TaskDefinition {
                name: "check".into(),
                service: "tests".into(),
                command: "./check.sh".into(),
            },
            TaskDefinition {
                name: "seed".into(),
                service: "tests".into(),
                command: "seed".into(),
            },
        ])
    }

    fn web_script() -> Script {
        let mut script = Script::default();
        script
            .banners
            .insert("web".into(), "listening on 8080".into());
        script
    }

    async fn run(factory: &RecordingFactory, test: &TestSpec) -> TestReport {
        run_with_env(factory, test, &TaskEnvironment::default()).await
    }

    async fn run_with_env(
        factory: &RecordingFactory,
        test: &TestSpec,
        env: &TaskEnvironment,
    ) -> TestReport {
        let tasks = catalog();
        let driver = factory.driver(&test.name);
        TestRunner::new(test, &tasks, env).run(&driver).await
    }

    #[test]
    fn test_evaluate_assert_present() {
        let out = "web | ready\n";
        assert!(evaluate(out, &strings(&["ready"]), &[]).is_ok());
    }

    #[test]
    fn test_evaluate_forbidden_wins_over_satisfied_assert() {
        let out = "web | ready\n";
        let err = evaluate(out, &strings(&["ready"]), &strings(&["ready"])).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ForbiddenPattern);
    }

    #[test]
    fn test_evaluate_forbidden_wins_over_missing_assert() {
        let out = "web | panic\n";
        let err = evaluate(out, &strings(&["ready"]), &strings(&["panic"])).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ForbiddenPattern);
    }

    #[test]
    fn test_evaluate_reports_every_missing_assert() {
        let err = evaluate("", &strings(&["a", "b"]), &strings(&["c"])).unwrap_err();
        match err {
            StepFailure::Assertion { missing } => assert_eq!(missing, strings(&["a", "b"])),
            other => panic!("Expected assertion failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_then_assert_passes() {
        let factory = RecordingFactory::new(web_script());
        let test = TestSpec {
            name: "basic".into(),
            before_startup: vec![],
            steps: vec![Step {
                start: strings(&["web"]),
                assert: strings(&["listening on"]),
                ..step()
            }],
        };
        let report = run(&factory, &test).await;
        assert!(report.success, "{:?}", report.failure);
        assert_eq!(factory.calls("basic"), vec!["up web", "logs", "stop-all"]);
    }

    #[tokio::test]
    async fn test_empty_lists_issue_no_calls() {
        let factory = RecordingFactory::default();
        let test = TestSpec {
            name: "noop".into(),
            before_startup: vec![],
            steps: vec![step(), step()],
        };
        let report = run(&factory, &test).await;
        assert!(report.success);
        assert_eq!(factory.calls("noop"), vec!["stop-all"]);
    }

    #[tokio::test]
    async fn test_actions_run_in_canonical_order() {
        let factory = RecordingFactory::default();
        let test = TestSpec {
            name: "order".into(),
            before_startup: strings(&["db"]),
            steps: vec![Step {
                exec: vec![TaskInvocation::Name("check".into())],
                destroy: strings(&["cache"]),
                stop: strings(&["worker"]),
                start: strings(&["web"]),
                wait: Some(Duration::from_millis(1)),
                fail: strings(&["panic"]),
                ..step()
            }],
        };
        let report = run(&factory, &test).await;
        assert!(report.success, "{:?}", report.failure);
        assert_eq!(
            factory.calls("order"),
            vec![
                "up db",
                "up web",
                "stop worker",
                "kill cache",
                "rm cache",
                "run check tests COMPOSE_SUITE_TEST_NAME=order",
                "logs",
                "stop-all",
            ]
        );
    }

    #[tokio::test]
    async fn test_exec_environment_order() {
        let factory = RecordingFactory::default();
        let global = TaskEnvironment::new(strings(&["HOST=h"]));
        let test = TestSpec {
            name: "env".into(),
            before_startup: vec![],
            steps: vec![Step {
                exec: vec![
                    TaskInvocation::WithEnv {
                        task: "seed".into(),
                        env: strings(&["ROWS=1", "HOST=x"]),
                    },
                    TaskInvocation::Name("check".into()),
                ],
                ..step()
            }],
        };
        let report = run_with_env(&factory, &test, &global).await;
        assert!(report.success);
        assert_eq!(
            factory.calls("env")[..2],
            [
                "run seed tests COMPOSE_SUITE_TEST_NAME=env HOST=h ROWS=1 HOST=x",
                "run check tests COMPOSE_SUITE_TEST_NAME=env HOST=h",
            ]
        );
    }

    #[tokio::test]
    async fn test_forbidden_pattern_fails_and_keeps_scope() {
        let factory = RecordingFactory::new(web_script());
        let test = TestSpec {
            name: "forbid".into(),
            before_startup: vec![],
            steps: vec![
                Step {
                    start: strings(&["web"]),
                    assert: strings(&["listening on"]),
                    fail: strings(&["listening on"]),
                    ..step()
                },
                Step {
                    stop: strings(&["web"]),
                    ..step()
                },
            ],
        };
        let report = run(&factory, &test).await;
        assert!(!report.success);
        assert_eq!(report.failure_kind(), Some(FailureKind::ForbiddenPattern));
        assert_eq!(report.failure.as_ref().unwrap().step, 1);
        assert!(report.system_output().contains("web | listening on 8080"));
        // Remaining steps are skipped, nothing is stopped or torn down
        let calls = factory.calls("forbid");
        assert!(!calls.iter().any(|c| c.starts_with("stop")));
        assert!(!calls.contains(&"cleanup".to_string()));
    }

    #[tokio::test]
    async fn test_action_failure_aborts_test() {
        let mut script = Script::default();
        script.failing.insert("up".into());
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "broken".into(),
            before_startup: vec![],
            steps: vec![
                Step {
                    start: strings(&["web"]),
                    exec: vec![TaskInvocation::Name("check".into())],
                    ..step()
                },
                step(),
            ],
        };
        let report = run(&factory, &test).await;
        assert_eq!(report.failure_kind(), Some(FailureKind::StepAction));
        assert_eq!(report.steps_run, 1);
        assert_eq!(factory.calls("broken"), vec!["up web", "logs"]);
    }

    #[tokio::test]
    async fn test_before_startup_failure_is_step_zero() {
        let mut script = Script::default();
        script.failing.insert("up".into());
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "pre".into(),
            before_startup: strings(&["db"]),
            steps: vec![step()],
        };
        let report = run(&factory, &test).await;
        assert_eq!(report.failure.as_ref().unwrap().step, 0);
        assert_eq!(report.steps_run, 0);
    }

    #[tokio::test]
    async fn test_destroy_tolerates_failed_kill() {
        let mut script = Script::default();
        script.failing.insert("kill".into());
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "gone".into(),
            before_startup: vec![],
            steps: vec![Step {
                destroy: strings(&["web"]),
                ..step()
            }],
        };
        let report = run(&factory, &test).await;
        assert!(report.success, "{:?}", report.failure);
    }

    #[tokio::test]
    async fn test_step_timeout_kills_running_task() {
        let mut script = Script::default();
        script.task_duration = Duration::from_millis(1000);
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "slow".into(),
            before_startup: vec![],
            steps: vec![Step {
                exec: vec![TaskInvocation::Name("check".into())],
                assert: strings(&["never"]),
                timeout: Duration::from_millis(100),
                ..Step::default()
            }],
        };

        let started = std::time::Instant::now();
        let report = run(&factory, &test).await;
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
        let calls = factory.calls("slow");
        assert!(calls.contains(&"killed check".to_string()));
        // Only the failure snapshot reads the logs; evaluation never ran
        assert_eq!(calls.iter().filter(|c| *c == "logs").count(), 1);
    }

    #[tokio::test]
    async fn test_wait_counts_against_timeout() {
        let factory = RecordingFactory::default();
        let test = TestSpec {
            name: "sleepy".into(),
            before_startup: vec![],
            steps: vec![Step {
                wait: Some(Duration::from_secs(10)),
                timeout: Duration::from_millis(50),
                ..Step::default()
            }],
        };
        let report = run(&factory, &test).await;
        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
    }

    #[tokio::test]
    async fn test_hung_stop_after_success_is_bounded() {
        let mut script = Script::default();
        script.hanging.insert("stop-all".into());
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "stuck-stop".into(),
            before_startup: vec![],
            steps: vec![Step {
                timeout: Duration::from_millis(100),
                ..Step::default()
            }],
        };

        let started = std::time::Instant::now();
        let report = run(&factory, &test).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(report.success, "{:?}", report.failure);
    }

    #[tokio::test]
    async fn test_hung_failure_snapshot_is_bounded() {
        let mut script = Script::default();
        script.hanging.insert("logs".into());
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "stuck-logs".into(),
            before_startup: vec![],
            steps: vec![Step {
                fail: strings(&["panic"]),
                timeout: Duration::from_millis(100),
                ..Step::default()
            }],
        };

        let started = std::time::Instant::now();
        let report = run(&factory, &test).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
        assert!(report
            .system_output()
            .starts_with("<could not capture system output"));
        assert_eq!(factory.calls("stuck-logs"), vec!["logs", "logs"]);
    }

    #[tokio::test]
    async fn test_task_output_visible_to_same_step_assertions() {
        let mut script = Script::default();
        script
            .task_logs
            .insert("seed".into(), "tests | seeded 10 rows".into());
        let factory = RecordingFactory::new(script);
        let test = TestSpec {
            name: "seeded".into(),
            before_startup: vec![],
            steps: vec![Step {
                exec: vec![TaskInvocation::Name("seed".into())],
                assert: strings(&["seeded 10 rows"]),
                ..step()
            }],
        };
        let report = run(&factory, &test).await;
        assert!(report.success, "{:?}", report.failure);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&step()), "no-op");
        let s = Step {
            start: strings(&["web", "db"]),
            exec: vec![TaskInvocation::Name("check".into())],
            ..step()
        };
        assert_eq!(describe(&s), "start web,db; exec check");
    }
}
