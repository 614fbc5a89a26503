//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_recovery::config::{load_configuration, Configuration};
use fleet_recovery::error::{ConfigError, ExecError};
use fleet_recovery::execs::{Exec, ExecInfo, ExecRegistry, RunArgs};
use fleet_recovery::metrics::MemoryMetrics;
use fleet_recovery::tlw::{Dut, MockAccess};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Exec answering from a script of outcomes; the last outcome repeats.
pub struct ScriptedExec {
    name: String,
    calls: Arc<AtomicUsize>,
    outcomes: Vec<bool>,
}

#[async_trait]
impl Exec for ScriptedExec {
    async fn run(&self, _info: &ExecInfo) -> Result<(), ExecError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .outcomes
            .get(n)
            .or(self.outcomes.last())
            .copied()
            .unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(ExecError::new(format!("{}: failed at call {}", self.name, n + 1)))
        }
    }
}

/// Builder for a registry holding the built-in execs plus scripted ones
pub struct TestRegistryBuilder {
    registry: ExecRegistry,
    calls: HashMap<String, Arc<AtomicUsize>>,
}

impl TestRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: ExecRegistry::with_builtins(),
            calls: HashMap::new(),
        }
    }

    /// Register `name` answering with `outcomes` in order
    pub fn with_exec(mut self, name: &str, outcomes: &[bool]) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        self.registry.register(
            name,
            ScriptedExec {
                name: name.to_string(),
                calls: calls.clone(),
                outcomes: outcomes.to_vec(),
            },
        );
        self.calls.insert(name.to_string(), calls);
        self
    }

    pub fn build(self) -> TestRegistry {
        TestRegistry {
            registry: Arc::new(self.registry),
            calls: self.calls,
        }
    }
}

pub struct TestRegistry {
    pub registry: Arc<ExecRegistry>,
    calls: HashMap<String, Arc<AtomicUsize>>,
}

impl TestRegistry {
    /// Number of times the scripted exec `name` ran
    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .get(name)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or_else(|| panic!("exec {name:?} is not scripted"))
    }

    pub fn load(&self, doc: &str) -> Result<Configuration, ConfigError> {
        load_configuration(doc.as_bytes(), &self.registry)
    }
}

/// Configuration document holding the single plan `p`
pub fn single_plan(plan_json: &str) -> String {
    format!(r#"{{"plans": {{"p": {plan_json}}}}}"#)
}

/// Run arguments for `dut-1` backed by a fresh mock and memory metrics
pub fn dut_run_args(metrics: &Arc<MemoryMetrics>) -> RunArgs {
    RunArgs::new("dut-1", Dut::new("dut-1"), Arc::new(MockAccess::new()))
        .with_metrics(metrics.clone())
}
