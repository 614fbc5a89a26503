//! Post-parse fixups and checks for a configuration.

use std::collections::HashSet;
use tracing::debug;

use super::{Action, Configuration, Plan};
use crate::error::ConfigError;
use crate::execs::ExecRegistry;

/// Complete and check a parsed configuration.
///
/// Materialises referenced but undefined actions, defaults empty exec names
/// to the action name, checks every exec is registered and rejects
/// reference cycles reachable from critical actions.
pub fn validate(config: &mut Configuration, registry: &ExecRegistry) -> Result<(), ConfigError> {
    if config.plans.is_empty() {
        return Err(ConfigError::NoPlans);
    }
    for name in &config.plan_names {
        if !config.plans.contains(name) {
            return Err(ConfigError::PlanNotFound(name.clone()));
        }
    }
    for (plan_name, plan) in config.plans.iter_mut() {
        materialise_actions(plan_name, plan);
        default_exec_names(plan);
        verify_execs(plan_name, plan, registry)?;
        detect_cycles(plan_name, plan)?;
    }
    Ok(())
}

fn materialise_actions(plan_name: &str, plan: &mut Plan) {
    for name in plan.referenced_names() {
        if !plan.actions.contains_key(&name) {
            debug!("Plan {plan_name:?}: action {name:?} is not defined, using default");
            plan.actions.insert(name, Action::default());
        }
    }
}

fn default_exec_names(plan: &mut Plan) {
    for (name, action) in plan.actions.iter_mut() {
        if action.exec_name.is_empty() {
            action.exec_name = name.clone();
        }
    }
}

fn verify_execs(plan_name: &str, plan: &Plan, registry: &ExecRegistry) -> Result<(), ConfigError> {
    for (name, action) in &plan.actions {
        if !registry.exists(&action.exec_name) {
            return Err(ConfigError::UnknownExec {
                plan: plan_name.to_string(),
                action: name.clone(),
                exec: action.exec_name.clone(),
            });
        }
    }
    Ok(())
}

/// Depth-first walk from every critical action. Reaching a name that is
/// already on the current path is a cycle.
fn detect_cycles(plan_name: &str, plan: &Plan) -> Result<(), ConfigError> {
    let mut path: Vec<String> = Vec::new();
    let mut acyclic: HashSet<String> = HashSet::new();
    for name in &plan.critical_actions {
        walk(plan_name, plan, name, &mut path, &mut acyclic)?;
    }
    Ok(())
}

fn walk(
    plan_name: &str,
    plan: &Plan,
    name: &str,
    path: &mut Vec<String>,
    acyclic: &mut HashSet<String>,
) -> Result<(), ConfigError> {
    if let Some(start) = path.iter().position(|n| n == name) {
        let mut cycle: Vec<String> = path[start..].to_vec();
        cycle.push(name.to_string());
        return Err(ConfigError::Cycle {
            plan: plan_name.to_string(),
            path: cycle,
        });
    }
    if acyclic.contains(name) {
        return Ok(());
    }
    path.push(name.to_string());
    if let Some(action) = plan.action(name) {
        for next in action.references() {
            walk(plan_name, plan, next, path, acyclic)?;
        }
    }
    path.pop();
    acyclic.insert(name.to_string());
    Ok(())
}
