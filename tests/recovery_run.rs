mod common;

use common::TestRegistryBuilder;
use fleet_recovery::error::{ErrorCode, RecoveryError};
use fleet_recovery::metrics::{ActionStatus, FileMetrics, MemoryMetrics, Metrics, Query};
use fleet_recovery::recovery::{run, RecoveryArgs, TaskName};
use fleet_recovery::tlw::{BluetoothPeerHost, Dut, HardwareState, MockAccess, ServoHost};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn dut_with_servo(name: &str) -> Dut {
    let mut dut = Dut::new(name);
    dut.servo_host = Some(ServoHost {
        name: format!("{name}-servo"),
        servod_port: 9999,
        ..ServoHost::default()
    });
    dut
}

fn mock_with(duts: Vec<Dut>) -> MockAccess {
    let access = MockAccess::new();
    for dut in duts {
        access.add_dut(dut);
    }
    access
}

#[tokio::test]
async fn test_plans_run_per_role_with_close_last() {
    let execs = TestRegistryBuilder::new()
        .with_exec("servo_check", &[true])
        .with_exec("dut_check", &[true])
        .with_exec("cleanup", &[true])
        .build();
    let access = mock_with(vec![dut_with_servo("dut-1")]);
    let metrics = Arc::new(MemoryMetrics::new());
    let report = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_registry(execs.registry.clone())
            .with_metrics(metrics.clone())
            .with_config_json(
                r#"{"plans": {
                    "close": {"critical_actions": ["cleanup"]},
                    "servo": {"critical_actions": ["servo_check"]},
                    "cros": {"critical_actions": ["dut_check"]}}}"#,
            ),
    )
    .await
    .unwrap();

    let order: Vec<(&str, &str)> = report
        .plan_reports()
        .map(|p| (p.plan_name.as_str(), p.resource.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![("servo", "dut-1-servo"), ("cros", "dut-1"), ("close", "dut-1")]
    );

    let library = metrics.actions_of_kind("run_library").await;
    assert_eq!(library.len(), 1);
    assert_eq!(library[0].hostname, "dut-1");
    assert_eq!(library[0].status, ActionStatus::Success);
    let task = metrics.actions_of_kind("run_task_recovery").await;
    assert_eq!(task.len(), 1);
    assert_eq!(task[0].status, ActionStatus::Success);
    let servo = metrics.actions_of_kind("servo_check").await;
    assert_eq!(servo[0].hostname, "dut-1-servo");
}

#[tokio::test]
async fn test_failed_plan_skips_rest_but_close_runs() {
    let execs = TestRegistryBuilder::new()
        .with_exec("broken", &[false])
        .with_exec("never", &[true])
        .with_exec("cleanup", &[true])
        .build();
    let access = mock_with(vec![Dut::new("dut-1")]);
    let err = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_registry(execs.registry.clone())
            .with_config_json(
                r#"{"plans": {
                    "cros": {"critical_actions": ["broken"]},
                    "android": {"critical_actions": ["never"]},
                    "close": {"critical_actions": ["cleanup"]}}}"#,
            ),
    )
    .await
    .unwrap_err();

    match &err {
        RecoveryError::Plan { plan, resource, .. } => {
            assert_eq!(plan, "cros");
            assert_eq!(resource, "dut-1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.code(), ErrorCode::PLAN_FAILED);
    assert_eq!(err.exit_code(), 1);
    assert_eq!(execs.calls("never"), 0);
    assert_eq!(execs.calls("cleanup"), 1);
}

#[tokio::test]
async fn test_allowed_failures_do_not_fail_the_run() {
    let execs = TestRegistryBuilder::new()
        .with_exec("flaky_peer", &[false])
        .with_exec("dut_check", &[true])
        .with_exec("cleanup", &[false])
        .build();
    let mut dut = Dut::new("dut-1");
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
    let access = mock_with(vec![dut]);
    let report = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_registry(execs.registry.clone())
            .with_config_json(
                r#"{"plans": {
                    "bluetooth_peer": {"allow_fail": true, "critical_actions": ["flaky_peer"]},
                    "cros": {"critical_actions": ["dut_check"]},
                    "close": {"critical_actions": ["cleanup"]}}}"#,
            ),
    )
    .await
    .unwrap();

    // Each peer runs the plan even though the first one failed.
    assert_eq!(execs.calls("flaky_peer"), 2);
    assert_eq!(execs.calls("dut_check"), 1);
    let failed: Vec<&str> = report
        .allowed_failures()
        .iter()
        .map(|p| p.plan_name.as_str())
        .collect();
    assert_eq!(failed, vec!["bluetooth_peer", "bluetooth_peer", "close"]);
}

#[tokio::test]
async fn test_missing_role_resource_is_a_noop() {
    let execs = TestRegistryBuilder::new()
        .with_exec("servo_check", &[false])
        .build();
    let access = mock_with(vec![Dut::new("dut-1")]);
    let report = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_registry(execs.registry.clone())
            .with_config_json(r#"{"plans": {"servo": {"critical_actions": ["servo_check"]}}}"#),
    )
    .await
    .unwrap();
    assert_eq!(report.plan_reports().count(), 0);
    assert_eq!(execs.calls("servo_check"), 0);
}

#[tokio::test]
async fn test_inventory_is_updated_even_after_failure() {
    let access = mock_with(vec![Dut::new("dut-1")]);
    let err = run(
        RecoveryArgs::new(Arc::new(access.clone()), "dut-1")
            .with_update_inventory(true)
            .with_config_json(
                r#"{"plans": {"cros": {
                    "critical_actions": ["Mark storage", "sample_fail"],
                    "actions": {"Mark storage": {
                        "exec_name": "set_storage_state",
                        "exec_args": ["state:need_replacement"]}}}}}"#,
            ),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PLAN_FAILED);

    let updated = access.updated_duts();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].storage_state, HardwareState::NeedReplacement);
}

#[tokio::test]
async fn test_inventory_update_disabled() {
    let access = mock_with(vec![Dut::new("dut-1")]);
    let report = run(
        RecoveryArgs::new(Arc::new(access.clone()), "dut-1")
            .with_config_json(r#"{"plans": {"cros": {"critical_actions": ["sample_pass"]}}}"#),
    )
    .await
    .unwrap();
    assert!(!report.resources[0].inventory_updated);
    assert!(access.updated_duts().is_empty());
}

#[tokio::test]
async fn test_every_resource_of_unit_runs() {
    let execs = TestRegistryBuilder::new()
        .with_exec("check", &[false, true])
        .build();
    let access = mock_with(vec![Dut::new("dut-a"), Dut::new("dut-b")]);
    access.add_unit("scheduling-unit-1", &["dut-a", "dut-b"]);
    let metrics = Arc::new(MemoryMetrics::new());
    let err = run(
        RecoveryArgs::new(Arc::new(access), "scheduling-unit-1")
            .with_registry(execs.registry.clone())
            .with_metrics(metrics.clone())
            .with_task(TaskName::Deploy)
            .with_config_json(r#"{"plans": {"cros": {"critical_actions": ["check"]}}}"#),
    )
    .await
    .unwrap_err();

    assert!(matches!(&err, RecoveryError::Plan { resource, .. } if resource == "dut-a"));
    assert_eq!(execs.calls("check"), 2);
    let tasks = metrics.actions_of_kind("run_task_deploy").await;
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].hostname, "dut-a");
    assert_eq!(tasks[0].status, ActionStatus::Fail);
    assert_eq!(tasks[1].hostname, "dut-b");
    assert_eq!(tasks[1].status, ActionStatus::Success);
    let library = metrics.actions_of_kind("run_library").await;
    assert_eq!(library[0].status, ActionStatus::Fail);
}

#[tokio::test]
async fn test_several_failures_are_aggregated() {
    let access = mock_with(vec![Dut::new("dut-a")]);
    access.add_unit("unit-1", &["dut-a", "dut-missing"]);
    let err = run(
        RecoveryArgs::new(Arc::new(access), "unit-1")
            .with_config_json(r#"{"plans": {"cros": {"critical_actions": ["sample_fail"]}}}"#),
    )
    .await
    .unwrap_err();
    match &err {
        RecoveryError::Run { code, failures } => {
            assert_eq!(*code, ErrorCode::OTHER_MULTIPLE);
            assert_eq!(failures.len(), 2);
            assert!(failures[1].contains("dut-missing"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unknown_unit_is_an_inventory_error() {
    let err = run(
        RecoveryArgs::new(Arc::new(MockAccess::new()), "nowhere")
            .with_config_json(r#"{"plans": {"cros": {"critical_actions": ["sample_pass"]}}}"#),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::INVENTORY_LIST_RESOURCES);
}

#[tokio::test]
async fn test_recovery_switch_is_honoured() {
    // Both runs share the script: fail, fail, then pass after recovery.
    let execs = TestRegistryBuilder::new()
        .with_exec("check", &[false, false, true])
        .with_exec("fix", &[true])
        .build();
    let config = r#"{"plans": {"cros": {"critical_actions": ["check"],
        "actions": {"check": {"recovery_actions": ["fix"]}}}}}"#;

    let access = mock_with(vec![Dut::new("dut-1")]);
    let result = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_registry(execs.registry.clone())
            .without_recovery()
            .with_config_json(config),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(execs.calls("fix"), 0);

    let access = mock_with(vec![Dut::new("dut-1")]);
    let report = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_registry(execs.registry.clone())
            .with_config_json(config),
    )
    .await
    .unwrap();
    assert_eq!(execs.calls("fix"), 1);
    assert_eq!(report.plan_reports().next().unwrap().recovered_actions, vec!["check"]);
}

#[tokio::test]
async fn test_cancelled_run() {
    let access = mock_with(vec![Dut::new("dut-1")]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_cancel(cancel)
            .with_config_json(
                r#"{"plans": {"cros": {"critical_actions": ["Wait"],
                    "actions": {"Wait": {"exec_name": "sample_sleep",
                                          "exec_args": ["sleep:30"]}}}}}"#,
            ),
    )
    .await
    .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.exit_code(), 130);
}

#[tokio::test]
async fn test_run_deadline_limits_the_run() {
    let access = mock_with(vec![Dut::new("dut-1")]);
    let err = run(
        RecoveryArgs::new(Arc::new(access), "dut-1")
            .with_run_deadline(Duration::from_millis(50))
            .with_config_json(
                r#"{"plans": {"cros": {"critical_actions": ["Wait"],
                    "actions": {"Wait": {"exec_name": "sample_sleep",
                                          "exec_args": ["sleep:30"]}}}}}"#,
            ),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::EXEC_DEADLINE_EXCEEDED);
}

#[tokio::test]
async fn test_file_metrics_keep_history_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FileMetrics::new(dir.path().join("metrics.jsonl")));
    for _ in 0..2 {
        let access = mock_with(vec![Dut::new("dut-1")]);
        let _ = run(
            RecoveryArgs::new(Arc::new(access), "dut-1")
                .with_metrics(sink.clone())
                .with_config_json(r#"{"plans": {"cros": {"critical_actions": ["sample_fail"]}}}"#),
        )
        .await;
    }
    let failures = sink
        .search(
            &Query::new()
                .hostname("dut-1")
                .kind("sample_fail")
                .status(ActionStatus::Fail),
        )
        .await
        .unwrap();
    assert_eq!(failures.len(), 2);
}
