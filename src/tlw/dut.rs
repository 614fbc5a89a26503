//! Device model shared with leaves during a run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hardware state recorded for a component of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareState {
    #[default]
    Unspecified,
    Normal,
    Acceptable,
    NeedReplacement,
    NotDetected,
}

impl HardwareState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "unspecified" => Some(Self::Unspecified),
            "normal" => Some(Self::Normal),
            "acceptable" => Some(Self::Acceptable),
            "need_replacement" | "needs_replacement" => Some(Self::NeedReplacement),
            "not_detected" => Some(Self::NotDetected),
            _ => None,
        }
    }
}

/// Inventory state of the whole device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutState {
    #[default]
    Unknown,
    Ready,
    NeedsRepair,
    RepairFailed,
    NeedsDeploy,
    NeedsReplacement,
    ManualRepair,
    Reserved,
}

/// State of an auxiliary host (chameleon, bluetooth peer, wifi router).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeripheralState {
    #[default]
    Unspecified,
    Working,
    Broken,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoHost {
    pub name: String,
    pub servod_port: u16,
    pub serial_number: String,
    pub usbkey_state: HardwareState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChameleonHost {
    pub name: String,
    pub state: PeripheralState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothPeerHost {
    pub name: String,
    pub state: PeripheralState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiRouterHost {
    pub name: String,
    pub model: String,
    pub state: PeripheralState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpmOutlet {
    pub hostname: String,
    pub outlet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionedInfo {
    pub cros_version: String,
    pub job_repo_url: String,
}

/// A device under test and the hosts attached to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dut {
    pub id: String,
    pub name: String,
    pub board: String,
    pub model: String,
    pub hwid: String,
    pub serial_number: String,
    pub state: DutState,

    pub storage_state: HardwareState,
    pub battery_state: HardwareState,
    pub wifi_state: HardwareState,
    pub bluetooth_state: HardwareState,

    pub servo_host: Option<ServoHost>,
    pub chameleon_host: Option<ChameleonHost>,
    pub bluetooth_peer_hosts: Vec<BluetoothPeerHost>,
    pub wifi_router_hosts: Vec<WifiRouterHost>,
    pub rpm_outlet: Option<RpmOutlet>,
    pub provisioned_info: ProvisionedInfo,
    pub extra_attributes: HashMap<String, Vec<String>>,
}

impl Dut {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn servo_host_name(&self) -> Option<&str> {
        self.servo_host
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|n| !n.is_empty())
    }

    pub fn chameleon_host_name(&self) -> Option<&str> {
        self.chameleon_host
            .as_ref()
            .map(|c| c.name.as_str())
            .filter(|n| !n.is_empty())
    }

    pub fn bluetooth_peer_names(&self) -> Vec<String> {
        self.bluetooth_peer_hosts
            .iter()
            .filter(|h| !h.name.is_empty())
            .map(|h| h.name.clone())
            .collect()
    }

    pub fn wifi_router_names(&self) -> Vec<String> {
        self.wifi_router_hosts
            .iter()
            .filter(|h| !h.name.is_empty())
            .map(|h| h.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_state_parse() {
        assert_eq!(
            HardwareState::parse("need_replacement"),
            Some(HardwareState::NeedReplacement)
        );
        assert_eq!(
            HardwareState::parse("NOT-DETECTED"),
            Some(HardwareState::NotDetected)
        );
        assert_eq!(HardwareState::parse("broken"), None);
    }

    #[test]
    fn test_dut_deserializes_with_defaults() {
        let dut: Dut = serde_json::from_str(
            r#"{"name": "dut-1", "servo_host": {"name": "servo-1", "servod_port": 9999}}"#,
        )
        .unwrap();
        assert_eq!(dut.name, "dut-1");
        assert_eq!(dut.servo_host_name(), Some("servo-1"));
        assert_eq!(dut.storage_state, HardwareState::Unspecified);
        assert!(dut.bluetooth_peer_names().is_empty());
    }
}
