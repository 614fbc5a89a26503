//! Built-in execs.
//!
//! The `sample_*` execs exist for plan authoring and tests. The rest are
//! generic infrastructure steps built on the exec context components.

use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{ExecInfo, ExecRegistry};
use crate::components::{wait_until_not_pingable, wait_until_pingable};
use crate::error::ExecError;
use crate::metrics::{ActionStatus, Query};
use crate::tlw::{
    CallBluetoothPeerRequest, CopyRequest, HardwareState, ProvisionRequest, RpmAction,
    RunRpmActionRequest, XmlRpcValue,
};

pub fn register_all(registry: &mut ExecRegistry) {
    registry.register("sample_pass", sample_pass);
    registry.register("sample_fail", sample_fail);
    registry.register("sample_sleep", sample_sleep);
    registry.register("dut_ping", dut_ping);
    registry.register("dut_ssh", dut_ssh);
    registry.register("run_shell_command", run_shell_command);
    registry.register("reboot_in_background", reboot_in_background);
    registry.register("rpm_power_cycle", rpm_power_cycle);
    registry.register("servod_has_control", servod_has_control);
    registry.register("servod_control_matches", servod_control_matches);
    registry.register("set_storage_state", set_storage_state);
    registry.register("recent_failures_below", recent_failures_below);
    registry.register("provision_stable_os", provision_stable_os);
    registry.register("collect_file", collect_file);
    registry.register("btpeer_server_ready", btpeer_server_ready);
}

async fn sample_pass(_info: ExecInfo) -> Result<(), ExecError> {
    Ok(())
}

async fn sample_fail(_info: ExecInfo) -> Result<(), ExecError> {
    Err(ExecError::new("sample_fail: failed"))
}

/// Sleep for `sleep:<seconds>`.
async fn sample_sleep(info: ExecInfo) -> Result<(), ExecError> {
    let duration = info
        .action_args()
        .as_duration("sleep", 0, Duration::from_secs(1));
    debug!("Sample sleep: sleeping {duration:?}");
    tokio::select! {
        _ = info.cancel_token().cancelled() => Err(ExecError::cancelled("sample_sleep: cancelled")),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Ping the resource. With `wait:<seconds>` keep pinging until it answers.
async fn dut_ping(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let host = args.as_string("host", info.resource_name());
    let count = u32::try_from(args.as_int("count", 2)).unwrap_or(2);
    let pinger = info.new_pinger(&host);
    let wait = args.as_duration("wait", 0, Duration::from_secs(1));
    if wait.is_zero() {
        return pinger.ping(count).await;
    }
    let interval = args.as_duration("interval", 1, Duration::from_secs(1));
    wait_until_pingable(&pinger, wait, interval, count).await
}

/// Check the resource accepts remote commands.
async fn dut_ssh(info: ExecInfo) -> Result<(), ExecError> {
    let host = info.action_args().as_string("host", info.resource_name());
    info.new_runner(&host)
        .run(info.action_timeout(), "true", &[])
        .await
        .map(|_| ())
}

/// Run `cmd:<command>`. Optional `host`, `background:true` and
/// `output_regex:<pattern>` which stdout must match.
async fn run_shell_command(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let cmd = args.as_string("cmd", "");
    if cmd.is_empty() {
        return Err(ExecError::new("run shell command: cmd is not provided"));
    }
    let host = args.as_string("host", info.resource_name());
    let runner = if args.as_bool("background", false) {
        info.new_background_runner(&host)
    } else {
        info.new_runner(&host)
    };
    let stdout = runner.run(info.action_timeout(), &cmd, &[]).await?;
    let pattern = args.as_string("output_regex", "");
    if pattern.is_empty() {
        return Ok(());
    }
    let re = Regex::new(&pattern).map_err(|e| {
        ExecError::loop_break(format!("run shell command: invalid output_regex: {e}"))
    })?;
    if re.is_match(&stdout) {
        Ok(())
    } else {
        Err(ExecError::new(format!(
            "run shell command: output {stdout:?} does not match {pattern:?}"
        )))
    }
}

/// Issue a reboot without waiting for it, then optionally wait for the
/// resource to go down (`wait_down`) and come back (`wait_up`).
async fn reboot_in_background(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let cmd = args.as_string("cmd", "reboot");
    info.new_background_runner(info.resource_name())
        .run(info.action_timeout(), &cmd, &[])
        .await?;
    info!("Reboot of {:?} issued", info.resource_name());

    let interval = args.as_duration("interval", 1, Duration::from_secs(1));
    let pinger = info.default_pinger();
    let wait_down = args.as_duration("wait_down", 0, Duration::from_secs(1));
    if !wait_down.is_zero() {
        wait_until_not_pingable(&pinger, wait_down, interval, 2).await?;
    }
    let wait_up = args.as_duration("wait_up", 0, Duration::from_secs(1));
    if !wait_up.is_zero() {
        wait_until_pingable(&pinger, wait_up, interval, 2).await?;
    }
    Ok(())
}

/// Power cycle (or `action:on|off`) the device through its RPM outlet.
async fn rpm_power_cycle(info: ExecInfo) -> Result<(), ExecError> {
    let action = match info
        .action_args()
        .as_string("action", "cycle")
        .to_ascii_lowercase()
        .as_str()
    {
        "on" => RpmAction::On,
        "off" => RpmAction::Off,
        "cycle" => RpmAction::Cycle,
        other => {
            return Err(ExecError::loop_break(format!(
                "rpm power cycle: unknown action {other:?}"
            )))
        }
    };
    let (hostname, outlet) = {
        let dut = info.dut().read().await;
        match &dut.rpm_outlet {
            Some(outlet) if !outlet.hostname.is_empty() => (dut.name.clone(), outlet.clone()),
            _ => {
                return Err(ExecError::new(format!(
                    "rpm power cycle: device {:?} has no rpm outlet",
                    dut.name
                )))
            }
        }
    };
    info.access()
        .run_rpm_action(RunRpmActionRequest {
            hostname,
            rpm_hostname: outlet.hostname,
            rpm_outlet: outlet.outlet,
            action,
        })
        .await
        .map_err(|e| ExecError::from(e).annotate("rpm power cycle"))
}

async fn servod_has_control(info: ExecInfo) -> Result<(), ExecError> {
    let control = info.action_args().as_string("control", "");
    if control.is_empty() {
        return Err(ExecError::new("servod has control: control is not provided"));
    }
    info.new_servod().await?.has(&control).await
}

/// Compare a servod control with `expected:<value>` or `regex:<pattern>`.
async fn servod_control_matches(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let control = args.as_string("control", "");
    if control.is_empty() {
        return Err(ExecError::new("servod control matches: control is not provided"));
    }
    let value = info.new_servod().await?.get(&control).await?.to_string();
    if args.has("expected") {
        let expected = args.as_string("expected", "");
        if value != expected {
            return Err(ExecError::new(format!(
                "servod control matches: {control:?} is {value:?}, expected {expected:?}"
            )));
        }
    }
    let pattern = args.as_string("regex", "");
    if !pattern.is_empty() {
        let re = Regex::new(&pattern).map_err(|e| {
            ExecError::loop_break(format!("servod control matches: invalid regex: {e}"))
        })?;
        if !re.is_match(&value) {
            return Err(ExecError::new(format!(
                "servod control matches: {control:?} is {value:?}, does not match {pattern:?}"
            )));
        }
    }
    Ok(())
}

/// Record `state:<hardware state>` for the device storage.
async fn set_storage_state(info: ExecInfo) -> Result<(), ExecError> {
    let raw = info.action_args().as_string("state", "");
    let state = HardwareState::parse(&raw).ok_or_else(|| {
        ExecError::loop_break(format!("set storage state: unknown state {raw:?}"))
    })?;
    let mut dut = info.dut().write().await;
    info!("Storage state of {:?} set to {state:?}", dut.name);
    dut.storage_state = state;
    Ok(())
}

/// Fail when `kind` failed `count` times or more on this resource within
/// the last `hours` hours.
async fn recent_failures_below(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let kind = args.as_string("kind", "");
    if kind.is_empty() {
        return Err(ExecError::new("recent failures below: kind is not provided"));
    }
    let Some(metrics) = info.metrics() else {
        debug!("Recent failures below: metrics are not available, skipping check");
        return Ok(());
    };
    let limit = usize::try_from(args.as_int("count", 3)).unwrap_or(3);
    let hours = args.as_int("hours", 24);
    let since = Utc::now() - chrono::Duration::hours(hours);
    let query = Query::new()
        .hostname(info.resource_name())
        .kind(kind.clone())
        .since(since)
        .status(ActionStatus::Fail)
        .limit(limit);
    let failures = metrics
        .search(&query)
        .await
        .map_err(|e| ExecError::from(e).annotate("recent failures below"))?;
    if failures.len() >= limit {
        return Err(ExecError::new(format!(
            "recent failures below: {kind:?} failed {} times in the last {hours}h",
            failures.len()
        )));
    }
    Ok(())
}

/// Install the stable OS version through the cache server.
async fn provision_stable_os(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let version = info.versioner().cros().await?;
    let bucket = args.as_string("bucket", "gs://chromeos-image-archive");
    let gs_path = format!("{}/{}", bucket.trim_end_matches('/'), version.os_image);
    let image_url = info
        .access()
        .get_cache_url(info.resource_name(), &gs_path)
        .await
        .map_err(|e| ExecError::from(e).annotate("provision stable os"))?;
    info.access()
        .provision(ProvisionRequest {
            resource: info.resource_name().to_string(),
            system_image_path: image_url,
            prevent_reboot: args.as_bool("prevent_reboot", false),
        })
        .await
        .map_err(|e| ExecError::from(e).annotate("provision stable os"))?;
    info.dut().write().await.provisioned_info.cros_version = version.os_image;
    Ok(())
}

/// Copy `src` from the resource into `dst` or the run log directory.
async fn collect_file(info: ExecInfo) -> Result<(), ExecError> {
    let args = info.action_args();
    let src = args.as_string("src", "");
    if src.is_empty() {
        return Err(ExecError::new("collect file: src is not provided"));
    }
    let dst_dir = match (args.get("dst").filter(|d| !d.is_empty()), &info.run_args().log_root) {
        (Some(dst), _) => Path::new(dst).to_path_buf(),
        (None, Some(root)) => root.join(info.resource_name()),
        (None, None) => {
            return Err(ExecError::new("collect file: no destination and no log root"))
        }
    };
    let file_name = Path::new(&src)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "collected".to_string());
    info.access()
        .copy_file_from(CopyRequest {
            resource: info.resource_name().to_string(),
            path_source: src,
            path_destination: dst_dir.join(file_name).to_string_lossy().into_owned(),
        })
        .await
        .map_err(|e| ExecError::from(e).annotate("collect file"))
}

/// Ask the bluetooth peer server whether it is ready.
async fn btpeer_server_ready(info: ExecInfo) -> Result<(), ExecError> {
    let method = info.action_args().as_string("method", "IsReady");
    let resp = info
        .access()
        .call_bluetooth_peer(CallBluetoothPeerRequest {
            resource: info.resource_name().to_string(),
            method: method.clone(),
            args: Vec::new(),
        })
        .await;
    if resp.fault {
        return Err(ExecError::new(format!(
            "btpeer server ready: {method} failed: {}",
            resp.value
        )));
    }
    match resp.value {
        XmlRpcValue::Bool(true) => Ok(()),
        other => Err(ExecError::new(format!(
            "btpeer server ready: {method} returned {other}"
        ))),
    }
}
