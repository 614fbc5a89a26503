use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::ExecError;

/// A critical action that ended the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionFailure {
    pub action: String,
    pub exec_name: String,
    pub reason: String,
}

/// Outcome of one plan against one resource.
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub plan_name: String,
    pub resource: String,
    pub allow_fail: bool,
    pub error: Option<ExecError>,
    pub failures: Vec<ActionFailure>,
    /// Actions that passed on the re-run after a recovery action.
    pub recovered_actions: Vec<String>,
    /// Actions excused by `allow_fail_after_recovery`.
    pub forgiven_failures: Vec<String>,
    /// Actions skipped because a condition failed.
    pub skipped_actions: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PlanReport {
    pub(crate) fn new(plan_name: &str, resource: &str, allow_fail: bool) -> Self {
        let now = Utc::now();
        Self {
            plan_name: plan_name.to_string(),
            resource: resource.to_string(),
            allow_fail,
            error: None,
            failures: Vec::new(),
            recovered_actions: Vec::new(),
            forgiven_failures: Vec::new(),
            skipped_actions: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// True when the plan failed with a cancellation or deadline error.
    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(ExecError::is_fatal)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn into_result(self) -> Result<(), ExecError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Display for PlanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.succeeded() { "success" } else { "fail" };
        write!(
            f,
            "plan {:?} on {:?}: {status} in {}ms (recovered: {}, forgiven: {}, skipped: {})",
            self.plan_name,
            self.resource,
            self.duration().num_milliseconds(),
            self.recovered_actions.len(),
            self.forgiven_failures.len(),
            self.skipped_actions.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  action {:?} (exec {:?}): {}",
                failure.action, failure.exec_name, failure.reason
            )?;
        }
        Ok(())
    }
}
