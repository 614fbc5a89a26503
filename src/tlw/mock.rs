//! In-memory [`Access`] double with scripted responses and call history.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    Access, CallBluetoothPeerRequest, CallBluetoothPeerResponse, CallServodRequest,
    CallServodResponse, CopyRequest, Dut, ProvisionRequest, RunRequest, RunResult,
    RunRpmActionRequest, ServodMethod, VersionRequest, XmlRpcValue,
};

#[derive(Clone, Default)]
pub struct MockAccess {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    expectations: Vec<RunExpectation>,
    run_history: Vec<RunRequest>,
    ping_script: HashMap<String, VecDeque<bool>>,
    pingable: HashMap<String, bool>,
    ping_history: Vec<String>,
    servod_controls: HashMap<String, XmlRpcValue>,
    servod_history: Vec<CallServodRequest>,
    btpeer_responses: HashMap<String, XmlRpcValue>,
    rpm_history: Vec<RunRpmActionRequest>,
    rpm_fails: bool,
    provision_history: Vec<ProvisionRequest>,
    versions: HashMap<String, HashMap<String, String>>,
    copy_history: Vec<CopyRequest>,
    units: HashMap<String, Vec<String>>,
    duts: HashMap<String, Dut>,
    updated_duts: Vec<Dut>,
}

struct RunExpectation {
    resource: String,
    command: String,
    response: RunResult,
    delay: Option<Duration>,
    times_called: usize,
    expected_times: Option<usize>,
}

pub struct MockRunConfig {
    access: MockAccess,
    expectation: RunExpectation,
}

impl MockAccess {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Expect `command` (including its arguments) to run on `resource`.
    ///
    /// Expectations are consumed in registration order; one limited with
    /// [`MockRunConfig::times`] is skipped once used up.
    pub fn expect_run(&self, resource: &str, command: &str) -> MockRunConfig {
        MockRunConfig {
            access: self.clone(),
            expectation: RunExpectation {
                resource: resource.to_string(),
                command: command.to_string(),
                response: RunResult::success(command, ""),
                delay: None,
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn run_history(&self) -> Vec<RunRequest> {
        self.lock().run_history.clone()
    }

    pub fn verify_called(&self, resource: &str, command: &str, times: usize) -> bool {
        let state = self.lock();
        let count = state
            .run_history
            .iter()
            .filter(|req| req.resource == resource && req.full_command() == command)
            .count();
        count == times
    }

    pub fn set_pingable(&self, resource: &str, pingable: bool) {
        self.lock().pingable.insert(resource.to_string(), pingable);
    }

    /// Queue ping outcomes; once drained the [`set_pingable`](Self::set_pingable) value applies.
    pub fn script_ping(&self, resource: &str, outcomes: &[bool]) {
        self.lock()
            .ping_script
            .entry(resource.to_string())
            .or_default()
            .extend(outcomes.iter().copied());
    }

    pub fn ping_count(&self, resource: &str) -> usize {
        self.lock()
            .ping_history
            .iter()
            .filter(|r| r.as_str() == resource)
            .count()
    }

    pub fn set_servod_control(&self, control: &str, value: impl Into<XmlRpcValue>) {
        self.lock()
            .servod_controls
            .insert(control.to_string(), value.into());
    }

    pub fn servod_control(&self, control: &str) -> Option<XmlRpcValue> {
        self.lock().servod_controls.get(control).cloned()
    }

    pub fn servod_history(&self) -> Vec<CallServodRequest> {
        self.lock().servod_history.clone()
    }

    pub fn set_btpeer_response(&self, method: &str, value: impl Into<XmlRpcValue>) {
        self.lock()
            .btpeer_responses
            .insert(method.to_string(), value.into());
    }

    pub fn fail_rpm(&self, fail: bool) {
        self.lock().rpm_fails = fail;
    }

    pub fn rpm_history(&self) -> Vec<RunRpmActionRequest> {
        self.lock().rpm_history.clone()
    }

    pub fn provision_history(&self) -> Vec<ProvisionRequest> {
        self.lock().provision_history.clone()
    }

    pub fn set_version(&self, resource: &str, key: &str, value: &str) {
        self.lock()
            .versions
            .entry(resource.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn copy_history(&self) -> Vec<CopyRequest> {
        self.lock().copy_history.clone()
    }

    pub fn add_unit(&self, unit: &str, resources: &[&str]) {
        self.lock().units.insert(
            unit.to_string(),
            resources.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn add_dut(&self, dut: Dut) {
        self.lock().duts.insert(dut.name.clone(), dut);
    }

    pub fn updated_duts(&self) -> Vec<Dut> {
        self.lock().updated_duts.clone()
    }
}

#[async_trait]
impl Access for MockAccess {
    async fn run(&self, req: RunRequest) -> RunResult {
        let full_command = req.full_command();
        let (response, delay) = {
            let mut state = self.lock();
            state.run_history.push(req.clone());
            let found = state.expectations.iter_mut().find(|e| {
                e.resource == req.resource
                    && e.command == full_command
                    && e.expected_times.map_or(true, |n| e.times_called < n)
            });
            match found {
                Some(expectation) => {
                    expectation.times_called += 1;
                    (expectation.response.clone(), expectation.delay)
                }
                None => {
                    return RunResult {
                        command: full_command.clone(),
                        exit_code: -3,
                        stdout: String::new(),
                        stderr: format!(
                            "mock: no expectation for {:?} on {:?}",
                            full_command, req.resource
                        ),
                    }
                }
            }
        };

        if let Some(delay) = delay {
            if req.in_background {
                return RunResult::success(full_command, "");
            }
            if delay > req.timeout {
                tokio::time::sleep(req.timeout).await;
                return RunResult {
                    command: full_command,
                    exit_code: 124,
                    stdout: String::new(),
                    stderr: "timed out".to_string(),
                };
            }
            tokio::time::sleep(delay).await;
        }
        response
    }

    async fn ping(&self, resource: &str, _count: u32) -> Result<()> {
        let mut state = self.lock();
        state.ping_history.push(resource.to_string());
        let scripted = state
            .ping_script
            .get_mut(resource)
            .and_then(|queue| queue.pop_front());
        let ok = scripted.unwrap_or_else(|| state.pingable.get(resource).copied().unwrap_or(true));
        if ok {
            Ok(())
        } else {
            Err(anyhow!("ping {resource}: no reply"))
        }
    }

    async fn call_servod(&self, req: CallServodRequest) -> CallServodResponse {
        let mut state = self.lock();
        state.servod_history.push(req.clone());
        let control = req.args.first().map(|v| v.to_string()).unwrap_or_default();
        match req.method {
            ServodMethod::Get => match state.servod_controls.get(&control) {
                Some(value) => CallServodResponse {
                    value: value.clone(),
                    fault: false,
                },
                None => CallServodResponse {
                    value: XmlRpcValue::String(format!("No control named {control:?}")),
                    fault: true,
                },
            },
            ServodMethod::Set => match req.args.get(1) {
                Some(value) => {
                    state.servod_controls.insert(control, value.clone());
                    CallServodResponse {
                        value: XmlRpcValue::Bool(true),
                        fault: false,
                    }
                }
                None => CallServodResponse {
                    value: XmlRpcValue::String("set requires a value".to_string()),
                    fault: true,
                },
            },
            ServodMethod::Doc => CallServodResponse {
                value: XmlRpcValue::String(format!("doc for {control}")),
                fault: !state.servod_controls.contains_key(&control),
            },
            ServodMethod::Hwinit => CallServodResponse {
                value: XmlRpcValue::Bool(true),
                fault: false,
            },
        }
    }

    async fn call_bluetooth_peer(
        &self,
        req: CallBluetoothPeerRequest,
    ) -> CallBluetoothPeerResponse {
        match self.lock().btpeer_responses.get(&req.method) {
            Some(value) => CallBluetoothPeerResponse {
                value: value.clone(),
                fault: false,
            },
            None => CallBluetoothPeerResponse {
                value: XmlRpcValue::String(format!("unknown method {:?}", req.method)),
                fault: true,
            },
        }
    }

    async fn run_rpm_action(&self, req: RunRpmActionRequest) -> Result<()> {
        let mut state = self.lock();
        state.rpm_history.push(req.clone());
        if state.rpm_fails {
            return Err(anyhow!("rpm {}: outlet {} not responding", req.rpm_hostname, req.rpm_outlet));
        }
        Ok(())
    }

    async fn provision(&self, req: ProvisionRequest) -> Result<()> {
        self.lock().provision_history.push(req);
        Ok(())
    }

    async fn get_cache_url(&self, resource: &str, gs_path: &str) -> Result<String> {
        if gs_path.is_empty() {
            return Err(anyhow!("get cache url for {resource}: empty path"));
        }
        let path = gs_path.trim_start_matches("gs://");
        Ok(format!("http://cache.lab/download/{path}"))
    }

    async fn version(&self, req: VersionRequest) -> Result<HashMap<String, String>> {
        self.lock()
            .versions
            .get(&req.resource)
            .cloned()
            .ok_or_else(|| anyhow!("version: no data for {:?}", req.resource))
    }

    async fn copy_file_from(&self, req: CopyRequest) -> Result<()> {
        self.lock().copy_history.push(req);
        Ok(())
    }

    async fn list_resources_for_unit(&self, unit_name: &str) -> Result<Vec<String>> {
        let state = self.lock();
        match state.units.get(unit_name) {
            Some(resources) => Ok(resources.clone()),
            None if state.duts.contains_key(unit_name) => Ok(vec![unit_name.to_string()]),
            None => Err(anyhow!("unit {unit_name:?} not found")),
        }
    }

    async fn get_dut(&self, resource: &str) -> Result<Dut> {
        self.lock()
            .duts
            .get(resource)
            .cloned()
            .ok_or_else(|| anyhow!("dut {resource:?} not found"))
    }

    async fn update_dut(&self, dut: &Dut) -> Result<()> {
        let mut state = self.lock();
        state.duts.insert(dut.name.clone(), dut.clone());
        state.updated_duts.push(dut.clone());
        Ok(())
    }
}

impl MockRunConfig {
    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.response.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.response.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.exit_code = code;
        self
    }

    /// Take this long to answer. A delay longer than the request timeout
    /// answers with exit code 124 once the timeout has passed.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.expectation.delay = Some(delay);
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.access.lock().expectations.push(self.expectation);
    }
}
