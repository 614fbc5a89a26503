//! Per-action metric records
//!
//! Every exec invocation, plan and run produces an [`Action`] record that
//! is created when the work starts and updated when it ends. Records are
//! written to a [`Metrics`] sink; a missing sink turns recording into a
//! no-op.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod backends;
pub mod recorder;

pub use backends::{FileMetrics, LogMetrics, MemoryMetrics};
pub use recorder::MetricRecord;

/// Final status of a recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Unspecified,
    Success,
    Fail,
}

/// A named value attached to an action record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub metric_kind: String,
    pub value_type: ValueType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
}

impl Observation {
    pub fn string(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            metric_kind: kind.into(),
            value_type: ValueType::String,
            value: value.into(),
        }
    }

    pub fn number(kind: impl Into<String>, value: impl ToString) -> Self {
        Self {
            metric_kind: kind.into(),
            value_type: ValueType::Number,
            value: value.to_string(),
        }
    }
}

/// One recorded unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Assigned by the sink on create when empty.
    #[serde(default)]
    pub id: String,
    pub kind: String,
    pub hostname: String,
    #[serde(default)]
    pub swarming_task_id: String,
    #[serde(default)]
    pub buildbucket_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub stop_time: Option<DateTime<Utc>>,
    pub status: ActionStatus,
    #[serde(default)]
    pub fail_reason: String,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

impl Action {
    pub fn new(kind: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind: kind.into(),
            hostname: hostname.into(),
            swarming_task_id: String::new(),
            buildbucket_id: String::new(),
            start_time: Utc::now(),
            stop_time: None,
            status: ActionStatus::Unspecified,
            fail_reason: String::new(),
            observations: Vec::new(),
        }
    }

    pub fn with_ids(mut self, swarming_task_id: &str, buildbucket_id: &str) -> Self {
        self.swarming_task_id = swarming_task_id.to_string();
        self.buildbucket_id = buildbucket_id.to_string();
        self
    }

    pub fn observation(&self, kind: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.metric_kind == kind)
    }
}

/// Filter for [`Metrics::search`].
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub hostname: Option<String>,
    pub action_kind: Option<String>,
    /// Only records started at or after this time.
    pub since: Option<DateTime<Utc>>,
    pub status: Option<ActionStatus>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.action_kind = Some(kind.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, action: &Action) -> bool {
        self.hostname.as_deref().map_or(true, |h| h == action.hostname)
            && self.action_kind.as_deref().map_or(true, |k| k == action.kind)
            && self.since.map_or(true, |t| action.start_time >= t)
            && self.status.map_or(true, |s| action.status == s)
    }

    /// Filter, order newest first and truncate.
    pub fn apply(&self, actions: impl IntoIterator<Item = Action>) -> Vec<Action> {
        let mut found: Vec<Action> = actions.into_iter().filter(|a| self.matches(a)).collect();
        found.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if let Some(limit) = self.limit {
            found.truncate(limit);
        }
        found
    }
}

/// Sink for action records.
#[async_trait]
pub trait Metrics: Send + Sync {
    /// Persist that an action has started. Assigns `action.id` when empty.
    async fn create(&self, action: &mut Action) -> Result<()>;

    /// Persist the status change and stop time of a created action.
    async fn update(&self, action: &Action) -> Result<()>;

    /// Look up records, newest first.
    async fn search(&self, query: &Query) -> Result<Vec<Action>>;
}
