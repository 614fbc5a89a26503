//! Plan engine.
//!
//! Runs the critical actions of one plan against one resource. Every
//! action goes through the same steps: cache lookup, conditions,
//! dependencies, exec, and recovery when the exec fails. Results are cached
//! per plan run according to the action's [`RunControl`].

use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::{Action, Plan, RunControl};
use crate::error::{ErrorTag, ExecError};
use crate::execs::{ExecInfo, ExecRegistry, RunArgs};
use crate::metrics::{self, MetricRecord, Observation};

mod report;

pub use report::{ActionFailure, PlanReport};

/// Successful end state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Passed,
    /// A condition failed, so the action was excused without running.
    Skipped,
}

#[derive(Debug, Clone)]
enum CachedResult {
    Passed,
    Failed(ExecError),
    /// Failed after recovery, excused by `allow_fail_after_recovery`.
    Forgiven(ExecError),
}

/// Executor for a single plan run.
pub struct Engine<'a> {
    plan_name: &'a str,
    plan: &'a Plan,
    args: Arc<RunArgs>,
    registry: Arc<ExecRegistry>,
    cache: HashMap<&'a str, CachedResult>,
    recovery_usage: HashSet<(&'a str, &'a str)>,
    recovered: Vec<String>,
    forgiven: Vec<String>,
    skipped: Vec<String>,
}

/// Run `plan` against the resource of `args`.
pub async fn run_plan(
    plan_name: &str,
    plan: &Plan,
    args: Arc<RunArgs>,
    registry: Arc<ExecRegistry>,
) -> PlanReport {
    Engine::new(plan_name, plan, args, registry).run().await
}

impl<'a> Engine<'a> {
    pub fn new(
        plan_name: &'a str,
        plan: &'a Plan,
        args: Arc<RunArgs>,
        registry: Arc<ExecRegistry>,
    ) -> Self {
        Self {
            plan_name,
            plan,
            args,
            registry,
            cache: HashMap::new(),
            recovery_usage: HashSet::new(),
            recovered: Vec::new(),
            forgiven: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Run every critical action in order; the first failure ends the plan.
    pub async fn run(mut self) -> PlanReport {
        let span = info_span!(
            "plan",
            plan = %self.plan_name,
            resource = %self.args.resource_name
        );
        async move { self.run_critical_actions().await }
            .instrument(span)
            .await
    }

    async fn run_critical_actions(&mut self) -> PlanReport {
        let plan = self.plan;
        let plan_name = self.plan_name;
        info!("Plan {plan_name:?}: started");
        let record_kind = format!("plan:{plan_name}");
        let mut record = MetricRecord::open(
            self.args.metrics.clone(),
            metrics::Action::new(record_kind, &self.args.resource_name)
                .with_ids(&self.args.swarming_task_id, &self.args.buildbucket_id),
        )
        .await;
        let mut report = PlanReport::new(plan_name, &self.args.resource_name, plan.allow_fail);

        for name in &plan.critical_actions {
            if let Err(err) = self.run_action(name, true).await {
                let exec_name = plan
                    .action(name)
                    .map(|a| a.exec_name.clone())
                    .unwrap_or_default();
                error!(
                    "Plan {plan_name:?}: critical action {name:?} (exec {exec_name:?}) failed: {err}"
                );
                report.failures.push(ActionFailure {
                    action: name.clone(),
                    exec_name,
                    reason: err.to_string(),
                });
                report.error = Some(err);
                break;
            }
        }

        report.recovered_actions = std::mem::take(&mut self.recovered);
        report.forgiven_failures = std::mem::take(&mut self.forgiven);
        report.skipped_actions = std::mem::take(&mut self.skipped);
        record.add_observation(Observation::number(
            "recovered_actions",
            report.recovered_actions.len(),
        ));
        record.add_observation(Observation::number(
            "forgiven_failures",
            report.forgiven_failures.len(),
        ));
        record.close(report.error.as_ref()).await;
        report.finished_at = chrono::Utc::now();

        match &report.error {
            None => info!("Plan {plan_name:?}: finished successfully."),
            Some(err) => info!("Plan {plan_name:?}: failed: {err}"),
        }
        report
    }

    fn action(&self, name: &str) -> Result<&'a Action, ExecError> {
        let plan: &'a Plan = self.plan;
        plan.action(name).ok_or_else(|| {
            ExecError::new(format!(
                "plan {:?}: action {name:?} not found",
                self.plan_name
            ))
        })
    }

    fn run_action(
        &mut self,
        name: &'a str,
        enable_recovery: bool,
    ) -> BoxFuture<'_, Result<ActionState, ExecError>> {
        let span = info_span!("action", action = %name);
        async move { self.run_action_steps(name, enable_recovery).await }
            .instrument(span)
            .boxed()
    }

    async fn run_action_steps(
        &mut self,
        name: &'a str,
        enable_recovery: bool,
    ) -> Result<ActionState, ExecError> {
        if self.args.cancel.is_cancelled() {
            return Err(ExecError::cancelled(format!("action {name:?}: run cancelled")));
        }
        if self.args.deadline_passed() {
            return Err(ExecError::deadline_exceeded(format!(
                "action {name:?}: run deadline exceeded"
            )));
        }
        let action = self.action(name)?;
        info!("Action {name:?}: started.");

        if action.run_control != RunControl::Rerun {
            if let Some(cached) = self.cache.get(name) {
                return match cached {
                    CachedResult::Passed => {
                        info!("Action {name:?}: pass (cached).");
                        Ok(ActionState::Passed)
                    }
                    CachedResult::Forgiven(err) => {
                        info!("Action {name:?}: fail (cached), allowed to fail: {err}");
                        Ok(ActionState::Passed)
                    }
                    CachedResult::Failed(err) => {
                        info!("Action {name:?}: fail (cached).");
                        Err(err.clone())
                    }
                };
            }
        }

        for condition in &action.conditions {
            match self.run_action(condition, false).await {
                Ok(_) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    info!("Action {name:?}: one of conditions {condition:?} failed, skipping...");
                    debug!("Action {name:?}: condition {condition:?} error: {err}");
                    self.skipped.push(name.to_string());
                    return Ok(ActionState::Skipped);
                }
            }
        }

        for dependency in &action.dependencies {
            // Not cached: only exec outcomes are, so the action is evaluated
            // again once a recovery discards the failed dependency.
            if let Err(err) = self.run_action(dependency, enable_recovery).await {
                return Err(err.annotate(format!("action {name:?}: dependency {dependency:?}")));
            }
        }

        let err = match self.run_exec(name, action, false).await {
            Ok(()) => {
                info!("Action {name:?}: finished successfully.");
                self.store(name, action, CachedResult::Passed);
                return Ok(ActionState::Passed);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => err,
        };

        let recovery_applicable =
            enable_recovery && self.args.enable_recovery && !action.recovery_actions.is_empty();
        if err.has_tag(ErrorTag::LoopBreak) {
            debug!("Action {name:?}: loop break, recovery actions are not used.");
        } else if recovery_applicable {
            if self.run_recoveries(name, action).await? {
                return match self.run_exec(name, action, true).await {
                    Ok(()) => {
                        info!("Action {name:?}: recovered.");
                        self.recovered.push(name.to_string());
                        self.store(name, action, CachedResult::Passed);
                        Ok(ActionState::Passed)
                    }
                    Err(err) if err.is_fatal() => Err(err),
                    Err(err) => {
                        info!("Action {name:?}: fail after recovery. Error: {err}");
                        self.store(name, action, CachedResult::Failed(err.clone()));
                        Err(err)
                    }
                };
            }
            if action.allow_fail_after_recovery {
                info!("Action {name:?}: fail, allowed to fail after recovery. Error: {err}");
                self.forgiven.push(name.to_string());
                self.store(name, action, CachedResult::Forgiven(err));
                return Ok(ActionState::Passed);
            }
        }

        info!("Action {name:?}: fail. Error: {err}");
        self.store(name, action, CachedResult::Failed(err.clone()));
        Err(err)
    }

    /// Try recovery actions in order until one passes.
    ///
    /// A recovery skipped by its own conditions counts as passed. Each
    /// (action, recovery) pair is tried at most once per plan run, and a
    /// recovery that already has a cached result counts as tried. Only fatal
    /// errors are returned.
    async fn run_recoveries(&mut self, name: &'a str, action: &'a Action) -> Result<bool, ExecError> {
        info!("Action {name:?}: starting recovery actions.");
        for recovery in &action.recovery_actions {
            let recovery = recovery.as_str();
            if !self.recovery_usage.insert((name, recovery)) {
                debug!("Action {name:?}: recovery {recovery:?} already used, skipping.");
                continue;
            }
            if self.cache.contains_key(recovery) {
                debug!("Action {name:?}: recovery {recovery:?} already ran, skipping.");
                continue;
            }
            match self.run_action(recovery, false).await {
                Ok(state) => {
                    if state == ActionState::Skipped {
                        debug!("Action {name:?}: recovery {recovery:?} skipped by its conditions.");
                    }
                    info!("Action {name:?}: recovery {recovery:?} passed.");
                    self.discard_rerun_after_recovery();
                    return Ok(true);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    info!("Action {name:?}: recovery {recovery:?} fail. Error: {err}");
                }
            }
        }
        Ok(false)
    }

    /// Invoke the exec of `action` with its effective budget and record it.
    async fn run_exec(&self, name: &str, action: &Action, rerun: bool) -> Result<(), ExecError> {
        let budget = self.exec_budget(action);
        let info = ExecInfo::new(
            self.args.clone(),
            &action.exec_name,
            name,
            action.exec_args.clone(),
            budget,
        );
        let mut record = MetricRecord::open(
            self.args.metrics.clone(),
            metrics::Action::new(&action.exec_name, &self.args.resource_name)
                .with_ids(&self.args.swarming_task_id, &self.args.buildbucket_id),
        )
        .await;
        record.add_observation(Observation::string("action", name));
        if rerun {
            record.add_observation(Observation::string("recovered", "true"));
        }
        debug!(
            "Action {name:?}: running exec {:?} with timeout {budget:?}",
            action.exec_name
        );

        let result = tokio::select! {
            _ = self.args.cancel.cancelled() => {
                Err(ExecError::cancelled(format!("action {name:?}: run cancelled")))
            }
            outcome = tokio::time::timeout(budget, self.registry.run(&action.exec_name, &info)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) if self.args.deadline_passed() => Err(ExecError::deadline_exceeded(
                        format!("action {name:?}: run deadline exceeded"),
                    )),
                    Err(_) => Err(ExecError::new(format!(
                        "action {name:?}: exec {:?} timed out after {budget:?}",
                        action.exec_name
                    ))),
                }
            }
        };
        record.close(result.as_ref().err()).await;
        result
    }

    /// Action timeout, capped by the time left in the run.
    fn exec_budget(&self, action: &Action) -> Duration {
        let timeout = action
            .exec_timeout
            .unwrap_or(self.args.default_exec_timeout);
        match self.args.remaining() {
            Some(remaining) => timeout.min(remaining),
            None => timeout,
        }
    }

    fn store(&mut self, name: &'a str, action: &Action, result: CachedResult) {
        if action.run_control != RunControl::Rerun {
            self.cache.insert(name, result);
        }
    }

    fn discard_rerun_after_recovery(&mut self) {
        let plan = self.plan;
        self.cache.retain(|name, _| {
            plan.action(name)
                .map_or(true, |a| a.run_control != RunControl::RerunAfterRecovery)
        });
    }
}
