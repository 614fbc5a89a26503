//! Exec leaves and the context they run with.
//!
//! An exec is a registered function that performs one verify or repair
//! step. The engine builds an [`ExecInfo`] for every invocation; leaves use
//! it to read their arguments and to obtain runners, pingers and other
//! components bound to the current resource.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::components::{Pinger, Runner, Servod, Versioner};
use crate::error::ExecError;
use crate::metrics::{Action, MetricRecord, Metrics};
use crate::tlw::{Access, Dut};

pub mod args;
pub mod builtin;
pub mod registry;

pub use args::ActionArgs;
pub use registry::{default_registry, Exec, ExecRegistry};

/// Budget used when an action sets no `exec_timeout`.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything shared by the actions of one plan run against one resource.
#[derive(Clone)]
pub struct RunArgs {
    pub resource_name: String,
    pub dut: Arc<RwLock<Dut>>,
    pub access: Arc<dyn Access>,
    pub metrics: Option<Arc<dyn Metrics>>,
    pub enable_recovery: bool,
    pub swarming_task_id: String,
    pub buildbucket_id: String,
    pub log_root: Option<PathBuf>,
    pub cancel: CancellationToken,
    /// Absolute end of the whole run.
    pub deadline: Option<Instant>,
    pub default_exec_timeout: Duration,
}

impl RunArgs {
    pub fn new(resource_name: impl Into<String>, dut: Dut, access: Arc<dyn Access>) -> Self {
        Self {
            resource_name: resource_name.into(),
            dut: Arc::new(RwLock::new(dut)),
            access,
            metrics: None,
            enable_recovery: true,
            swarming_task_id: String::new(),
            buildbucket_id: String::new(),
            log_root: None,
            cancel: CancellationToken::new(),
            deadline: None,
            default_exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn without_recovery(mut self) -> Self {
        self.enable_recovery = false;
        self
    }

    /// Same run state pointed at another resource.
    pub fn for_resource(&self, resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            ..self.clone()
        }
    }

    /// Time left until the run deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_passed(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}

/// Per-invocation context handed to an exec.
#[derive(Clone)]
pub struct ExecInfo {
    run_args: Arc<RunArgs>,
    exec_name: String,
    action_name: String,
    action_args: Vec<String>,
    action_timeout: Duration,
}

impl ExecInfo {
    pub fn new(
        run_args: Arc<RunArgs>,
        exec_name: impl Into<String>,
        action_name: impl Into<String>,
        action_args: Vec<String>,
        action_timeout: Duration,
    ) -> Self {
        Self {
            run_args,
            exec_name: exec_name.into(),
            action_name: action_name.into(),
            action_args,
            action_timeout,
        }
    }

    pub fn run_args(&self) -> &RunArgs {
        &self.run_args
    }

    pub fn resource_name(&self) -> &str {
        &self.run_args.resource_name
    }

    pub fn exec_name(&self) -> &str {
        &self.exec_name
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Raw `exec_args` of the action.
    pub fn raw_action_args(&self) -> &[String] {
        &self.action_args
    }

    pub fn action_args(&self) -> ActionArgs {
        ActionArgs::parse(&self.action_args)
    }

    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    pub fn access(&self) -> Arc<dyn Access> {
        self.run_args.access.clone()
    }

    pub fn dut(&self) -> &Arc<RwLock<Dut>> {
        &self.run_args.dut
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.run_args.cancel
    }

    pub fn metrics(&self) -> Option<Arc<dyn Metrics>> {
        self.run_args.metrics.clone()
    }

    pub fn new_runner(&self, host: &str) -> Runner {
        Runner::new(self.access(), host)
            .with_cancel(self.run_args.cancel.clone())
            .with_deadline(self.run_args.deadline)
    }

    /// Runner that returns once the command is dispatched.
    pub fn new_background_runner(&self, host: &str) -> Runner {
        self.new_runner(host).background()
    }

    pub fn default_runner(&self) -> Runner {
        self.new_runner(self.resource_name())
    }

    pub fn new_pinger(&self, host: &str) -> Pinger {
        Pinger::new(self.access(), host).with_cancel(self.run_args.cancel.clone())
    }

    pub fn default_pinger(&self) -> Pinger {
        self.new_pinger(self.resource_name())
    }

    /// Servod client for the servo host attached to the device.
    pub async fn new_servod(&self) -> Result<Servod, ExecError> {
        let dut = self.run_args.dut.read().await;
        match &dut.servo_host {
            Some(servo) if !servo.name.is_empty() => Ok(Servod::new(
                self.access(),
                servo.name.clone(),
                servo.servod_port,
            )
            .with_timeout(self.action_timeout)),
            _ => Err(ExecError::new(format!(
                "new servod: device {:?} has no servo host",
                dut.name
            ))),
        }
    }

    pub fn versioner(&self) -> Versioner {
        Versioner::new(self.access(), self.resource_name())
    }

    /// Start a metric record of `kind` for the current resource.
    pub async fn new_metric(&self, kind: &str) -> MetricRecord {
        let action = Action::new(kind, self.resource_name()).with_ids(
            &self.run_args.swarming_task_id,
            &self.run_args.buildbucket_id,
        );
        MetricRecord::open(self.metrics(), action).await
    }
}
