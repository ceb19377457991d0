//! Task environment resolution
//!
//! Order is fixed: the scope marker, then suite-wide variables, then the
//! call-site variables of one `exec` entry. Duplicates are passed through
//! untouched; the container sees them in order, so the last one wins.

use crate::common::ENV_PREFIX;

/// Ordered `VAR=VALUE` assignments for one task invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEnvironment {
    vars: Vec<String>,
}

impl TaskEnvironment {
    pub fn new(vars: Vec<String>) -> Self {
        Self { vars }
    }

    /// Merge global and call-site variables, global first
    pub fn resolve(global: &TaskEnvironment, call_site: &[String]) -> Self {
        let mut vars = global.vars.clone();
        vars.extend(call_site.iter().cloned());
        Self { vars }
    }

    /// Name of the variable carrying the scope
    pub fn scope_var() -> String {
        format!("{}_TEST_NAME", ENV_PREFIX)
    }

    /// `<ENV_PREFIX>_TEST_NAME=<scope>`
    pub fn scope_marker(scope: &str) -> String {
        format!("{}={}", Self::scope_var(), scope)
    }

    /// Full assignment list as injected into a container for `scope`
    pub fn with_scope(&self, scope: &str) -> Vec<String> {
        let mut vars = Vec::with_capacity(self.vars.len() + 1);
        vars.push(Self::scope_marker(scope));
        vars.extend(self.vars.iter().cloned());
        vars
    }

    pub fn push(&mut self, var: impl Into<String>) {
        self.vars.push(var.into());
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
