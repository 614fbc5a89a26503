//! Open/close lifecycle of a single action record.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::{Action, ActionStatus, Metrics, Observation};
use crate::error::ExecError;

/// An open action record.
///
/// Starts with status `Fail` so that a record which is never closed reads
/// as a failure. Sink errors are logged and never fail the recorded work.
pub struct MetricRecord {
    sink: Option<Arc<dyn Metrics>>,
    action: Action,
}

impl MetricRecord {
    pub async fn open(sink: Option<Arc<dyn Metrics>>, mut action: Action) -> Self {
        action.start_time = Utc::now();
        action.status = ActionStatus::Fail;
        if let Some(sink) = &sink {
            if let Err(e) = sink.create(&mut action).await {
                warn!("Metrics: failed to create record {:?}: {e:#}", action.kind);
            }
        }
        Self { sink, action }
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn add_observation(&mut self, observation: Observation) {
        self.action.observations.push(observation);
    }

    /// Set stop time and status from `err`, then upload the update.
    pub async fn close(mut self, err: Option<&ExecError>) -> Action {
        let stop = Utc::now();
        self.action.stop_time = Some(stop.max(self.action.start_time));
        match err {
            None => {
                self.action.status = ActionStatus::Success;
                self.action.fail_reason.clear();
            }
            Some(err) => {
                self.action.status = ActionStatus::Fail;
                self.action.fail_reason = err.to_string();
            }
        }
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.update(&self.action).await {
                warn!("Metrics: failed to update record {:?}: {e:#}", self.action.kind);
            }
        }
        self.action
    }
}
