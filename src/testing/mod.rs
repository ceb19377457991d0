//! Suite execution
//!
//! A suite runs its tests one at a time; each test is a list of steps driven
//! against a runtime driver scoped to that test. Assertions are literal
//! substring checks over the system's aggregated logs.

#[cfg(test)]
mod recording;
mod report;
mod runner;
mod suite;

pub use report::{FailureKind, StepFailure, SuiteSummary, TestFailure, TestReport};
pub use runner::{evaluate, Phase, TestRunner};
pub use suite::Suite;
