mod common;

use common::{single_plan, TestRegistryBuilder};
use fleet_recovery::config::{load_configuration_from_path, RunControl};
use fleet_recovery::error::{ConfigError, ErrorCode, RecoveryError};
use fleet_recovery::execs::ExecRegistry;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const REPAIR_CONFIG: &str = r#"{
  "plan_names": ["servo", "cros"],
  "plans": {
    "cros": {
      "critical_actions": ["Device is pingable", "Device is SSHable"],
      "actions": {
        "Device is pingable": {
          "exec_name": "dut_ping",
          "exec_extra_args": ["count:2"],
          "exec_timeout": {"seconds": 15},
          "docs": ["Ping the device before trying SSH."]
        },
        "Device is SSHable": {
          "exec_name": "dut_ssh",
          "dependencies": ["Device is pingable"],
          "recovery_actions": ["Power cycle by RPM"],
          "run_control": "RERUN_AFTER_RECOVERY"
        },
        "Power cycle by RPM": {
          "exec_name": "rpm_power_cycle",
          "exec_timeout": "2m",
          "run_control": "ALWAYS_RUN"
        }
      }
    },
    "servo": {
      "allow_fail": true,
      "critical_actions": ["sample_pass"]
    },
    "close": {
      "critical_actions": ["sample_pass"]
    }
  }
}"#;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(REPAIR_CONFIG.as_bytes()).unwrap();
    let config =
        load_configuration_from_path(file.path(), &ExecRegistry::with_builtins()).unwrap();

    assert_eq!(config.ordered_plan_names(), vec!["servo", "cros"]);
    assert!(config.plan("servo").unwrap().allow_fail);

    let cros = config.plan("cros").unwrap();
    let ping = cros.action("Device is pingable").unwrap();
    assert_eq!(ping.exec_args, vec!["count:2"]);
    assert_eq!(ping.exec_timeout, Some(Duration::from_secs(15)));
    assert_eq!(ping.docs.len(), 1);

    let ssh = cros.action("Device is SSHable").unwrap();
    assert_eq!(ssh.run_control, RunControl::RerunAfterRecovery);
    assert_eq!(ssh.exec_timeout, None);

    let rpm = cros.action("Power cycle by RPM").unwrap();
    assert_eq!(rpm.run_control, RunControl::Rerun);
    assert_eq!(rpm.exec_timeout, Some(Duration::from_secs(120)));
}

#[test]
fn test_exec_names_default_and_are_registered() {
    let registry = ExecRegistry::with_builtins();
    let execs = TestRegistryBuilder::new().build();
    let config = execs
        .load(&single_plan(
            r#"{"critical_actions": ["sample_pass", "check"], "actions": {
                "check": {"exec_name": "dut_ping", "conditions": ["sample_sleep"],
                          "recovery_actions": ["reboot_in_background"]}}}"#,
        ))
        .unwrap();
    let plan = config.plan("p").unwrap();
    for (name, action) in &plan.actions {
        assert!(!action.exec_name.is_empty(), "{name} has no exec");
        assert!(registry.exists(&action.exec_name), "{name} uses unknown exec");
    }
    assert_eq!(plan.action("sample_sleep").unwrap().exec_name, "sample_sleep");
}

#[test]
fn test_every_reference_is_materialised() {
    let execs = TestRegistryBuilder::new().build();
    let config = execs
        .load(&single_plan(
            r#"{"critical_actions": ["sample_pass"], "actions": {
                "sample_pass": {"dependencies": ["sample_sleep"],
                                "recovery_actions": ["sample_fail"]}}}"#,
        ))
        .unwrap();
    let plan = config.plan("p").unwrap();
    for name in plan.referenced_names() {
        assert!(plan.actions.contains_key(&name), "{name} is missing");
    }
    assert_eq!(plan.actions.len(), 3);
}

#[test]
fn test_unregistered_exec_is_rejected() {
    let execs = TestRegistryBuilder::new().build();
    let err = execs
        .load(&single_plan(r#"{"critical_actions": ["flash_firmware"]}"#))
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownExec { ref exec, .. } if exec == "flash_firmware"));
}

#[test]
fn test_cycle_through_condition_and_recovery() {
    let execs = TestRegistryBuilder::new().build();
    let err = execs
        .load(&single_plan(
            r#"{"critical_actions": ["a"], "actions": {
                "a": {"exec_name": "sample_pass", "conditions": ["b"]},
                "b": {"exec_name": "sample_pass", "recovery_actions": ["c"]},
                "c": {"exec_name": "sample_pass", "dependencies": ["a"]}}}"#,
        ))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Cycle { ref path, .. } if path.len() == 4));
}

#[test]
fn test_config_errors_map_to_codes() {
    let execs = TestRegistryBuilder::new().build();
    let cases = [
        ("", ErrorCode::CONFIG_EMPTY),
        ("{\"plans\":", ErrorCode::CONFIG_INVALID_JSON),
        (r#"{"plans": {}}"#, ErrorCode::CONFIG_NO_PLANS),
        (
            r#"{"plan_names": ["cros"], "plans": {"servo": {}}}"#,
            ErrorCode::CONFIG_PLAN_NOT_FOUND,
        ),
    ];
    for (doc, code) in cases {
        let err: RecoveryError = execs.load(doc).unwrap_err().into();
        assert_eq!(err.code(), code, "{doc:?}");
        assert_eq!(err.exit_code(), 3);
    }
}
