//! Test and suite reports

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::common::Error;

/// Why a step failed; aborts the rest of its test only
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error("{0}")]
    Action(#[source] Error),

    #[error("expected output to contain {}", quote_all(.missing))]
    Assertion { missing: Vec<String> },

    #[error("output contains forbidden {}", quote_all(.found))]
    ForbiddenPattern { found: Vec<String> },

    #[error("step timed out after {0:?}")]
    Timeout(Duration),
}

impl StepFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            StepFailure::Action(_) => FailureKind::StepAction,
            StepFailure::Assertion { .. } => FailureKind::Assertion,
            StepFailure::ForbiddenPattern { .. } => FailureKind::ForbiddenPattern,
            StepFailure::Timeout(_) => FailureKind::StepTimeout,
        }
    }
}

impl From<Error> for StepFailure {
    fn from(e: Error) -> Self {
        StepFailure::Action(e)
    }
}

fn quote_all(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure category as recorded in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StepAction,
    Assertion,
    ForbiddenPattern,
    StepTimeout,
}

/// Where and how a test failed
#[derive(Debug, Clone, Serialize)]
pub struct TestFailure {
    /// 1-based step number; 0 means the `before_startup` phase
    pub step: usize,
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one test run
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub name: String,
    pub success: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub failure: Option<TestFailure>,
    /// Aggregated system logs, captured when the test failed
    pub system_output: String,
}

impl TestReport {
    pub fn passed(name: &str, steps_total: usize) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            steps_run: steps_total,
            steps_total,
            failure: None,
            system_output: String::new(),
        }
    }

    pub fn failed(
        name: &str,
        step: usize,
        steps_total: usize,
        failure: &StepFailure,
        system_output: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            steps_run: step,
            steps_total,
            failure: Some(TestFailure {
                step,
                kind: failure.kind(),
                message: failure.to_string(),
            }),
            system_output,
        }
    }

    pub fn system_output(&self) -> &str {
        &self.system_output
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Aggregate of a whole suite run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteSummary {
    pub suite: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub reports: Vec<TestReport>,
}

impl SuiteSummary {
    pub fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, report: TestReport) {
        if report.success {
            self.succeeded.push(report.name.clone());
        } else {
            self.failed.push(report.name.clone());
        }
        self.reports.push(report);
    }

    /// 0 when every test passed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() {
            0
        } else {
            1
        }
    }

    /// Write the summary as pretty JSON
    pub fn write_json(&self, path: &std::path::Path) -> crate::common::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
