//! Run orchestrator.
//!
//! Loads a configuration once, then for every resource of a unit reads the
//! device from inventory, runs each plan against the resources of its role
//! and writes the device back. A failing resource does not stop the others.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::app::AppConfig;
use crate::config::{
    load_configuration, load_configuration_from_path, validate, Configuration, CLOSE_PLAN,
};
use crate::engine::{self, PlanReport};
use crate::error::{ErrorCode, ExecError, RecoveryError, Result};
use crate::execs::{self, default_registry, ExecRegistry, DEFAULT_EXEC_TIMEOUT};
use crate::metrics::{self, MetricRecord, Metrics};
use crate::tlw::{Access, Dut};

/// Metric kind of the record covering a whole run.
pub const RUN_LIBRARY_KIND: &str = "run_library";

/// Label of the task a run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskName {
    #[default]
    Recovery,
    Deploy,
    Custom,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Recovery => "recovery",
            TaskName::Deploy => "deploy",
            TaskName::Custom => "custom",
        }
    }

    /// Metric kind of the per-resource task record.
    pub fn metric_kind(&self) -> String {
        format!("run_task_{}", self.as_str())
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the plan configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Json(Vec<u8>),
    Path(PathBuf),
    /// Already parsed; still validated before use.
    Parsed(Configuration),
}

/// Input of a run.
#[derive(Clone)]
pub struct RecoveryArgs {
    pub access: Arc<dyn Access>,
    pub unit_name: String,
    pub config: Option<ConfigSource>,
    pub metrics: Option<Arc<dyn Metrics>>,
    pub task_name: TaskName,
    pub enable_recovery: bool,
    pub enable_update_inventory: bool,
    pub swarming_task_id: String,
    pub buildbucket_id: String,
    pub log_root: Option<PathBuf>,
    pub registry: Arc<ExecRegistry>,
    pub cancel: CancellationToken,
    /// Budget of the whole run, measured from its start.
    pub run_deadline: Option<Duration>,
    pub default_exec_timeout: Duration,
}

impl RecoveryArgs {
    pub fn new(access: Arc<dyn Access>, unit_name: impl Into<String>) -> Self {
        Self {
            access,
            unit_name: unit_name.into(),
            config: None,
            metrics: None,
            task_name: TaskName::default(),
            enable_recovery: true,
            enable_update_inventory: false,
            swarming_task_id: String::new(),
            buildbucket_id: String::new(),
            log_root: None,
            registry: default_registry(),
            cancel: CancellationToken::new(),
            run_deadline: None,
            default_exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    pub fn with_config_json(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.config = Some(ConfigSource::Json(data.into()));
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = Some(ConfigSource::Path(path.into()));
        self
    }

    pub fn with_configuration(mut self, config: Configuration) -> Self {
        self.config = Some(ConfigSource::Parsed(config));
        self
    }

    /// Read the whole configuration document from `reader` up front.
    pub fn with_config_reader<R: Read>(mut self, mut reader: R) -> std::io::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.config = Some(ConfigSource::Json(data));
        Ok(self)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_task(mut self, task_name: TaskName) -> Self {
        self.task_name = task_name;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ExecRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_deadline(mut self, budget: Duration) -> Self {
        self.run_deadline = Some(budget);
        self
    }

    pub fn with_ids(mut self, swarming_task_id: &str, buildbucket_id: &str) -> Self {
        self.swarming_task_id = swarming_task_id.to_string();
        self.buildbucket_id = buildbucket_id.to_string();
        self
    }

    pub fn with_log_root(mut self, log_root: impl Into<PathBuf>) -> Self {
        self.log_root = Some(log_root.into());
        self
    }

    pub fn without_recovery(mut self) -> Self {
        self.enable_recovery = false;
        self
    }

    pub fn with_update_inventory(mut self, enable: bool) -> Self {
        self.enable_update_inventory = enable;
        self
    }

    /// Apply the `[engine]` settings of the application configuration.
    pub fn with_app_config(mut self, config: &AppConfig) -> Self {
        self.default_exec_timeout = config.engine.default_exec_timeout;
        self.run_deadline = config.engine.run_deadline;
        self.enable_recovery = config.engine.enable_recovery;
        self.enable_update_inventory = config.engine.enable_update_inventory;
        self
    }

    fn verify(&self) -> Result<()> {
        if self.unit_name.trim().is_empty() {
            return Err(RecoveryError::invalid_args(
                ErrorCode::ARGS_MISSING_UNIT,
                "unit name is not provided",
            ));
        }
        if self.config.is_none() {
            return Err(RecoveryError::invalid_args(
                ErrorCode::ARGS_MISSING_CONFIG,
                format!("configuration is not provided for {} task", self.task_name),
            ));
        }
        Ok(())
    }

    fn load_configuration(&self) -> Result<Configuration> {
        let config = match &self.config {
            Some(ConfigSource::Json(data)) => load_configuration(data.as_slice(), &self.registry)?,
            Some(ConfigSource::Path(path)) => load_configuration_from_path(path, &self.registry)?,
            Some(ConfigSource::Parsed(config)) => {
                let mut config = config.clone();
                validate(&mut config, &self.registry)?;
                config
            }
            None => {
                return Err(RecoveryError::invalid_args(
                    ErrorCode::ARGS_MISSING_CONFIG,
                    "configuration is not provided",
                ))
            }
        };
        Ok(config)
    }
}

impl fmt::Debug for RecoveryArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryArgs")
            .field("unit_name", &self.unit_name)
            .field("task_name", &self.task_name)
            .field("enable_recovery", &self.enable_recovery)
            .field("enable_update_inventory", &self.enable_update_inventory)
            .field("run_deadline", &self.run_deadline)
            .field("default_exec_timeout", &self.default_exec_timeout)
            .finish_non_exhaustive()
    }
}

/// Plans run against one resource of the unit.
#[derive(Debug, Clone)]
pub struct ResourceReport {
    pub resource: String,
    pub plans: Vec<PlanReport>,
    /// Plans not started because an earlier plan failed.
    pub skipped_plans: Vec<String>,
    pub inventory_updated: bool,
    pub succeeded: bool,
}

impl ResourceReport {
    fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            plans: Vec::new(),
            skipped_plans: Vec::new(),
            inventory_updated: false,
            succeeded: false,
        }
    }
}

/// Outcome of a successful run.
///
/// Plans that were allowed to fail still appear with their error.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub unit_name: String,
    pub task_name: TaskName,
    pub resources: Vec<ResourceReport>,
}

impl RunReport {
    pub fn plan_reports(&self) -> impl Iterator<Item = &PlanReport> {
        self.resources.iter().flat_map(|r| r.plans.iter())
    }

    /// Failed plans that did not fail the run.
    pub fn allowed_failures(&self) -> Vec<&PlanReport> {
        self.plan_reports()
            .filter(|p| p.allow_fail && !p.succeeded())
            .collect()
    }
}

/// Resources a plan runs against, by the role its name denotes.
///
/// Unknown plan names target the device itself.
pub fn plan_resources(plan_name: &str, dut: &Dut) -> Vec<String> {
    let single = |name: Option<&str>| -> Vec<String> {
        name.filter(|n| !n.is_empty())
            .map(str::to_string)
            .into_iter()
            .collect()
    };
    match plan_name {
        "servo" => single(dut.servo_host_name()),
        "chameleon" => single(dut.chameleon_host_name()),
        "bluetooth_peer" => dut.bluetooth_peer_names(),
        "wifi_router" => dut.wifi_router_names(),
        _ => single(Some(dut.name.as_str())),
    }
}

/// Plan names in run order; the closing plan, when defined, goes last.
pub fn plan_order(config: &Configuration) -> Vec<String> {
    let mut names: Vec<String> = config
        .ordered_plan_names()
        .into_iter()
        .filter(|n| n != CLOSE_PLAN)
        .collect();
    if config.plans.contains(CLOSE_PLAN) {
        names.push(CLOSE_PLAN.to_string());
    }
    names
}

/// Run every plan of the configuration against the resources of the unit.
pub async fn run(args: RecoveryArgs) -> Result<RunReport> {
    args.verify()?;
    let mut record = MetricRecord::open(
        args.metrics.clone(),
        metrics::Action::new(RUN_LIBRARY_KIND, &args.unit_name)
            .with_ids(&args.swarming_task_id, &args.buildbucket_id),
    )
    .await;
    let span = info_span!("unit", unit = %args.unit_name, task = %args.task_name);
    let result = run_unit(&args).instrument(span).await;
    let failure = result.as_ref().err().map(|e| ExecError::new(e.to_string()));
    record.close(failure.as_ref()).await;
    result
}

async fn run_unit(args: &RecoveryArgs) -> Result<RunReport> {
    let config = args.load_configuration()?;
    let deadline = run_deadline_from(Instant::now(), args.run_deadline);
    let resources = args
        .access
        .list_resources_for_unit(&args.unit_name)
        .await
        .map_err(|e| {
            RecoveryError::inventory(
                ErrorCode::INVENTORY_LIST_RESOURCES,
                format!("list resources for unit {:?}", args.unit_name),
                e,
            )
        })?;
    info!("Unit {:?}: resources {resources:?}", args.unit_name);

    let mut report = RunReport {
        unit_name: args.unit_name.clone(),
        task_name: args.task_name,
        resources: Vec::new(),
    };
    let mut errors: Vec<RecoveryError> = Vec::new();
    for (i, resource) in resources.iter().enumerate() {
        if args.cancel.is_cancelled() {
            break;
        }
        if i != 0 {
            debug!("Continue to the next resource.");
        }
        let (resource_report, resource_errors) =
            run_resource(args, &config, resource, deadline).await;
        report.resources.push(resource_report);
        errors.extend(resource_errors);
    }

    if args.cancel.is_cancelled() || errors.iter().any(RecoveryError::is_cancelled) {
        return Err(RecoveryError::Cancelled {
            code: ErrorCode::EXEC_CANCELLED,
            message: format!("unit {:?}", args.unit_name),
        });
    }
    match errors.len() {
        0 => {
            info!("Unit {:?}: finished successfully.", args.unit_name);
            Ok(report)
        }
        1 => Err(errors.remove(0)),
        _ => Err(RecoveryError::Run {
            code: ErrorCode::OTHER_MULTIPLE,
            failures: errors.iter().map(ToString::to_string).collect(),
        }),
    }
}

async fn run_resource(
    args: &RecoveryArgs,
    config: &Configuration,
    resource: &str,
    deadline: Option<Instant>,
) -> (ResourceReport, Vec<RecoveryError>) {
    let span = info_span!("resource", resource = %resource);
    async move {
        info!("Resource {resource:?}: started");
        let mut task_record = MetricRecord::open(
            args.metrics.clone(),
            metrics::Action::new(args.task_name.metric_kind(), resource)
                .with_ids(&args.swarming_task_id, &args.buildbucket_id),
        )
        .await;
        let mut report = ResourceReport::new(resource);
        let mut errors = Vec::new();

        match args.access.get_dut(resource).await {
            Err(e) => errors.push(RecoveryError::inventory(
                ErrorCode::INVENTORY_READ_DUT,
                format!("read inventory {resource:?}"),
                e,
            )),
            Ok(dut) => {
                let exec_args = exec_run_args(args, dut, deadline);
                run_dut_plans(args, config, &exec_args, &mut report, &mut errors).await;
                // Written back whether or not the plans passed.
                if args.enable_update_inventory {
                    let dut = exec_args.dut.read().await.clone();
                    info!("Update inventory {:?}: starting...", dut.name);
                    match args.access.update_dut(&dut).await {
                        Ok(()) => {
                            report.inventory_updated = true;
                            info!("Update inventory {:?}: successful.", dut.name);
                        }
                        Err(e) => errors.push(RecoveryError::inventory(
                            ErrorCode::INVENTORY_UPDATE_DUT,
                            format!("update inventory {:?}", dut.name),
                            e,
                        )),
                    }
                } else {
                    info!("Update inventory {resource:?}: disabled.");
                }
            }
        }

        report.succeeded = errors.is_empty();
        let failure = (!errors.is_empty()).then(|| {
            ExecError::new(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        });
        task_record.close(failure.as_ref()).await;
        (report, errors)
    }
    .instrument(span)
    .await
}

/// Deadline of a run started at `start`; a budget past the clock's range
/// means no deadline.
fn run_deadline_from(start: Instant, budget: Option<Duration>) -> Option<Instant> {
    let budget = budget?;
    let deadline = start.checked_add(budget);
    if deadline.is_none() {
        warn!("Run deadline {budget:?} is out of range, running without a deadline.");
    }
    deadline
}

fn exec_run_args(args: &RecoveryArgs, dut: Dut, deadline: Option<Instant>) -> execs::RunArgs {
    let mut exec_args = execs::RunArgs::new(dut.name.clone(), dut, args.access.clone())
        .with_cancel(args.cancel.clone());
    exec_args.metrics = args.metrics.clone();
    exec_args.enable_recovery = args.enable_recovery;
    exec_args.swarming_task_id = args.swarming_task_id.clone();
    exec_args.buildbucket_id = args.buildbucket_id.clone();
    exec_args.log_root = args.log_root.clone();
    exec_args.deadline = deadline;
    exec_args.default_exec_timeout = args.default_exec_timeout;
    exec_args
}

async fn run_dut_plans(
    args: &RecoveryArgs,
    config: &Configuration,
    exec_args: &execs::RunArgs,
    report: &mut ResourceReport,
    errors: &mut Vec<RecoveryError>,
) {
    let mut stopped = false;
    let mut fatal = false;
    for plan_name in plan_order(config) {
        let closing = plan_name == CLOSE_PLAN;
        if fatal || (stopped && !closing) {
            report.skipped_plans.push(plan_name);
            continue;
        }
        let Some(plan) = config.plan(&plan_name) else {
            warn!("Run plan {plan_name:?}: not found in configuration.");
            continue;
        };
        let allow_fail = plan.allow_fail || closing;
        let targets = plan_resources(&plan_name, &*exec_args.dut.read().await);
        if targets.is_empty() {
            info!("Run plan {plan_name:?}: no resources found.");
            continue;
        }
        for target in targets {
            info!("Run plan {plan_name:?} for {target:?}: started");
            let run_args = Arc::new(exec_args.for_resource(&target));
            let mut plan_report =
                engine::run_plan(&plan_name, plan, run_args, args.registry.clone()).await;
            plan_report.allow_fail = allow_fail;
            let error = plan_report.error.clone();
            let is_fatal = plan_report.is_fatal();
            report.plans.push(plan_report);
            let Some(err) = error else {
                info!("Run plan {plan_name:?} for {target:?}: finished successfully.");
                continue;
            };
            if is_fatal {
                errors.push(RecoveryError::plan(&plan_name, &target, err));
                fatal = true;
                break;
            }
            if allow_fail {
                debug!("Run plan {plan_name:?} for {target:?}: ignore error as allowed to fail.");
            } else {
                errors.push(RecoveryError::plan(&plan_name, &target, err));
                stopped = true;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlw::{BluetoothPeerHost, MockAccess, ServoHost};

    fn args(unit: &str) -> RecoveryArgs {
        RecoveryArgs::new(Arc::new(MockAccess::new()), unit)
    }

    #[test]
    fn test_plan_resources_by_role() {
        let mut dut = Dut::new("dut-1");
        assert_eq!(plan_resources("cros", &dut), vec!["dut-1"]);
        assert_eq!(plan_resources("close", &dut), vec!["dut-1"]);
        assert_eq!(plan_resources("custom_checks", &dut), vec!["dut-1"]);
        assert!(plan_resources("servo", &dut).is_empty());
        assert!(plan_resources("bluetooth_peer", &dut).is_empty());

        dut.servo_host = Some(ServoHost {
            name: "servo-1".into(),
            ..ServoHost::default()
        });
        dut.bluetooth_peer_hosts = vec![
            BluetoothPeerHost {
                name: "btpeer-1".into(),
                ..BluetoothPeerHost::default()
            },
            BluetoothPeerHost {
                name: "btpeer-2".into(),
                ..BluetoothPeerHost::default()
            },
        ];
        assert_eq!(plan_resources("servo", &dut), vec!["servo-1"]);
        assert_eq!(plan_resources("bluetooth_peer", &dut), vec!["btpeer-1", "btpeer-2"]);
    }

    #[test]
    fn test_close_plan_goes_last() {
        let config: Configuration = serde_json::from_str(
            r#"{"plans": {"close": {}, "servo": {}, "cros": {}}}"#,
        )
        .unwrap();
        assert_eq!(plan_order(&config), vec!["servo", "cros", "close"]);

        let config: Configuration = serde_json::from_str(
            r#"{"plan_names": ["cros"], "plans": {"close": {}, "cros": {}}}"#,
        )
        .unwrap();
        assert_eq!(plan_order(&config), vec!["cros", "close"]);
    }

    #[tokio::test]
    async fn test_missing_unit_and_config() {
        let err = run(args("").with_config_json("{}")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ARGS_MISSING_UNIT);
        assert_eq!(err.exit_code(), 2);

        let err = run(args("dut-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ARGS_MISSING_CONFIG);
    }

    #[tokio::test]
    async fn test_bad_configuration_is_a_config_error() {
        let err = run(args("dut-1").with_config_json(r#"{"plans": {}}"#))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_NO_PLANS);
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_with_app_config() {
        let config = AppConfig::from_toml_str(
            r#"
            [engine]
            default_exec_timeout = "2m"
            run_deadline = "1h"
            enable_recovery = false
            enable_update_inventory = true
            "#,
        )
        .unwrap();
        let args = args("dut-1").with_app_config(&config);
        assert_eq!(args.default_exec_timeout, Duration::from_secs(120));
        assert_eq!(args.run_deadline, Some(Duration::from_secs(3600)));
        assert!(!args.enable_recovery);
        assert!(args.enable_update_inventory);
    }

    #[test]
    fn test_run_deadline_from_budget() {
        let start = Instant::now();
        assert_eq!(run_deadline_from(start, None), None);
        assert_eq!(
            run_deadline_from(start, Some(Duration::from_secs(60))),
            Some(start + Duration::from_secs(60))
        );
        assert_eq!(run_deadline_from(start, Some(Duration::MAX)), None);
    }

    #[tokio::test]
    async fn test_huge_run_deadline_runs_without_deadline() {
        let access = MockAccess::new();
        access.add_dut(Dut::new("dut-1"));
        let run_args = RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_run_deadline(Duration::MAX)
            .with_config_json(r#"{"plans": {"cros": {"critical_actions": ["sample_pass"]}}}"#);
        let report = run(run_args).await.unwrap();
        assert!(report.plan_reports().all(PlanReport::succeeded));
    }

    #[test]
    fn test_task_metric_kind() {
        assert_eq!(TaskName::Recovery.metric_kind(), "run_task_recovery");
        assert_eq!(TaskName::Deploy.to_string(), "deploy");
    }
}
