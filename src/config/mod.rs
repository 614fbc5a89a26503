//! Plan configuration model.
//!
//! A configuration holds named plans. A plan names its critical actions and
//! defines actions keyed by name; actions refer to each other by name
//! through conditions, dependencies and recovery actions.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod loader;
pub mod timeout;
pub mod validator;

pub use loader::{load_configuration, load_configuration_from_path, parse_configuration};
pub use validator::validate;

/// Name of the plan that always runs last.
pub const CLOSE_PLAN: &str = "close";

/// Top level plan configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Execution order of plans. Document order of `plans` when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan_names: Vec<String>,
    #[serde(default)]
    pub plans: Plans,
}

impl Configuration {
    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    /// Plan names in execution order.
    pub fn ordered_plan_names(&self) -> Vec<String> {
        if self.plan_names.is_empty() {
            self.plans.names().map(str::to_string).collect()
        } else {
            self.plan_names.clone()
        }
    }
}

/// Plans keyed by name, kept in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plans(Vec<(String, Plan)>);

impl Plans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a plan; a new name goes last.
    pub fn insert(&mut self, name: impl Into<String>, plan: Plan) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = plan,
            None => self.0.push((name, plan)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Plan> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Plan)> {
        self.0.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Plan)> {
        self.0.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Plans {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, plan) in &self.0 {
            map.serialize_entry(name, plan)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Plans {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PlansVisitor;

        impl<'de> Visitor<'de> for PlansVisitor {
            type Value = Plans;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of plan name to plan")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Plans, A::Error> {
                let mut plans = Plans::new();
                while let Some((name, plan)) = access.next_entry::<String, Plan>()? {
                    plans.insert(name, plan);
                }
                Ok(plans)
            }
        }

        deserializer.deserialize_map(PlansVisitor)
    }
}

impl<S: Into<String>> FromIterator<(S, Plan)> for Plans {
    fn from_iter<I: IntoIterator<Item = (S, Plan)>>(iter: I) -> Self {
        let mut plans = Plans::new();
        for (name, plan) in iter {
            plans.insert(name, plan);
        }
        plans
    }
}

/// A named unit of work for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub critical_actions: Vec<String>,
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
    #[serde(default)]
    pub allow_fail: bool,
}

impl Plan {
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Every action name referenced by the plan, critical actions first.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.critical_actions.clone();
        for action in self.actions.values() {
            names.extend(action.references().map(str::to_string));
        }
        names
    }
}

/// Caching policy for an action's result within one plan run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunControl {
    /// Reuse the first result.
    #[default]
    #[serde(rename = "run-once", alias = "RUN_ONCE", alias = "run_once")]
    RunOnce,
    /// Never reuse a result.
    #[serde(rename = "rerun", alias = "ALWAYS_RUN", alias = "always-run", alias = "always_run")]
    Rerun,
    /// Reuse the result until any recovery action succeeds.
    #[serde(
        rename = "rerun-after-recovery",
        alias = "RERUN_AFTER_RECOVERY",
        alias = "rerun_after_recovery"
    )]
    RerunAfterRecovery,
}

/// A node of the plan graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Registered exec to run; defaults to the action name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exec_name: String,
    #[serde(default, alias = "exec_extra_args", skip_serializing_if = "Vec::is_empty")]
    pub exec_args: Vec<String>,
    #[serde(
        default,
        with = "timeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub exec_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_actions: Vec<String>,
    #[serde(default)]
    pub allow_fail_after_recovery: bool,
    #[serde(default)]
    pub run_control: RunControl,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docs: Vec<String>,
}

impl Action {
    /// Action that runs the exec of the same name.
    pub fn with_exec(exec_name: impl Into<String>) -> Self {
        Self {
            exec_name: exec_name.into(),
            ..Self::default()
        }
    }

    /// Referenced names: conditions, then dependencies, then recovery
    /// actions.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .chain(self.dependencies.iter())
            .chain(self.recovery_actions.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plans_keep_document_order() {
        let config: Configuration = serde_json::from_str(
            r#"{"plans": {"servo": {}, "cros": {}, "close": {}}}"#,
        )
        .unwrap();
        assert_eq!(config.ordered_plan_names(), vec!["servo", "cros", "close"]);
    }

    #[test]
    fn test_plan_names_override_order() {
        let config: Configuration = serde_json::from_str(
            r#"{"plan_names": ["cros", "servo"], "plans": {"servo": {}, "cros": {}}}"#,
        )
        .unwrap();
        assert_eq!(config.ordered_plan_names(), vec!["cros", "servo"]);
    }

    #[test]
    fn test_run_control_aliases() {
        for (raw, expected) in [
            ("\"run-once\"", RunControl::RunOnce),
            ("\"RUN_ONCE\"", RunControl::RunOnce),
            ("\"rerun\"", RunControl::Rerun),
            ("\"ALWAYS_RUN\"", RunControl::Rerun),
            ("\"rerun-after-recovery\"", RunControl::RerunAfterRecovery),
            ("\"RERUN_AFTER_RECOVERY\"", RunControl::RerunAfterRecovery),
        ] {
            let parsed: RunControl = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, expected, "{raw}");
        }
    }

    #[test]
    fn test_exec_extra_args_alias() {
        let action: Action =
            serde_json::from_str(r#"{"exec_extra_args": ["a:1"], "docs": ["Checks a."]}"#)
                .unwrap();
        assert_eq!(action.exec_args, vec!["a:1"]);
        assert_eq!(action.docs, vec!["Checks a."]);
    }

    #[test]
    fn test_serialize_round_trip_keeps_order() {
        let plans: Plans = [("b", Plan::default()), ("a", Plan::default())]
            .into_iter()
            .collect();
        let config = Configuration {
            plan_names: Vec::new(),
            plans,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: Configuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ordered_plan_names(), vec!["b", "a"]);
    }
}
