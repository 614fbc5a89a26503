//! Access capability consumed by the recovery engine.
//!
//! Everything that talks to the outside world (remote shells, servod, RPM
//! controllers, inventory) is reached through the [`Access`] trait. The
//! engine never performs its own RPCs.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub mod dut;
pub mod mock;
pub mod xmlrpc;

pub use dut::{
    BluetoothPeerHost, ChameleonHost, Dut, DutState, HardwareState, PeripheralState, RpmOutlet,
    ServoHost, WifiRouterHost,
};
pub use mock::MockAccess;
pub use xmlrpc::XmlRpcValue;

/// Request to run a shell command on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub resource: String,
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Return as soon as the command is dispatched.
    pub in_background: bool,
}

impl RunRequest {
    pub fn new(resource: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(60),
            in_background: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn in_background(mut self) -> Self {
        self.in_background = true;
        self
    }

    /// Command line as it is sent to the resource.
    pub fn full_command(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Result of a remote command.
///
/// Negative exit codes describe transport failures; 124 means the command
/// timed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn success(command: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServodMethod {
    Get,
    Set,
    Doc,
    Hwinit,
}

impl ServodMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServodMethod::Get => "get",
            ServodMethod::Set => "set",
            ServodMethod::Doc => "doc",
            ServodMethod::Hwinit => "hwinit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallServodRequest {
    pub resource: String,
    pub method: ServodMethod,
    pub args: Vec<XmlRpcValue>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallServodResponse {
    pub value: XmlRpcValue,
    pub fault: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallBluetoothPeerRequest {
    pub resource: String,
    pub method: String,
    pub args: Vec<XmlRpcValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallBluetoothPeerResponse {
    pub value: XmlRpcValue,
    pub fault: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RpmAction {
    On,
    Off,
    Cycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRpmActionRequest {
    pub hostname: String,
    pub rpm_hostname: String,
    pub rpm_outlet: String,
    pub action: RpmAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub resource: String,
    pub system_image_path: String,
    pub prevent_reboot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    Cros,
    Ap,
    Cr50,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRequest {
    pub resource: String,
    pub version_type: VersionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub resource: String,
    pub path_source: String,
    pub path_destination: String,
}

/// Capability through which leaves reach external collaborators.
#[async_trait]
pub trait Access: Send + Sync {
    /// Execute a shell command on a resource.
    ///
    /// Transport failures are reported through a negative exit code rather
    /// than an error.
    async fn run(&self, req: RunRequest) -> RunResult;

    /// Send `count` ICMP echo requests. Succeeds iff any reply arrived.
    async fn ping(&self, resource: &str, count: u32) -> Result<()>;

    async fn call_servod(&self, req: CallServodRequest) -> CallServodResponse;

    async fn call_bluetooth_peer(&self, req: CallBluetoothPeerRequest)
        -> CallBluetoothPeerResponse;

    async fn run_rpm_action(&self, req: RunRpmActionRequest) -> Result<()>;

    async fn provision(&self, req: ProvisionRequest) -> Result<()>;

    async fn get_cache_url(&self, resource: &str, gs_path: &str) -> Result<String>;

    async fn version(&self, req: VersionRequest) -> Result<HashMap<String, String>>;

    async fn copy_file_from(&self, req: CopyRequest) -> Result<()>;

    /// Resource names that belong to a unit.
    async fn list_resources_for_unit(&self, unit_name: &str) -> Result<Vec<String>>;

    async fn get_dut(&self, resource: &str) -> Result<Dut>;

    async fn update_dut(&self, dut: &Dut) -> Result<()>;
}
