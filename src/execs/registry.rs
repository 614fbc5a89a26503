//! Name to exec lookup table.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::{builtin, ExecInfo};
use crate::error::ExecError;

/// A leaf action that can be referenced by `exec_name`.
#[async_trait]
pub trait Exec: Send + Sync {
    async fn run(&self, info: &ExecInfo) -> Result<(), ExecError>;
}

#[async_trait]
impl<F, Fut> Exec for F
where
    F: Fn(ExecInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecError>> + Send + 'static,
{
    async fn run(&self, info: &ExecInfo) -> Result<(), ExecError> {
        (self)(info.clone()).await
    }
}

/// Registered execs, read-only once built.
#[derive(Clone, Default)]
pub struct ExecRegistry {
    execs: HashMap<String, Arc<dyn Exec>>,
}

impl ExecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in exec.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register `exec` under `name`.
    ///
    /// # Panics
    ///
    /// Panics when `name` is empty or already registered. Registration
    /// happens while wiring the process up, so either is a programming
    /// error.
    pub fn register<E>(&mut self, name: &str, exec: E)
    where
        E: Exec + 'static,
    {
        assert!(!name.trim().is_empty(), "exec registry: empty exec name");
        assert!(
            !self.execs.contains_key(name),
            "exec registry: exec {name:?} is already registered"
        );
        self.execs.insert(name.to_string(), Arc::new(exec));
    }

    pub fn exists(&self, name: &str) -> bool {
        self.execs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.execs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.execs.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.execs.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn run(&self, name: &str, info: &ExecInfo) -> Result<(), ExecError> {
        match self.execs.get(name) {
            Some(exec) => exec.run(info).await,
            None => Err(ExecError::new(format!("exec {name:?}: not found"))),
        }
    }
}

impl std::fmt::Debug for ExecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecRegistry")
            .field("execs", &self.names())
            .finish()
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<ExecRegistry>> =
    Lazy::new(|| Arc::new(ExecRegistry::with_builtins()));

/// Process-wide registry of built-in execs.
pub fn default_registry() -> Arc<ExecRegistry> {
    DEFAULT_REGISTRY.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_info: ExecInfo) -> Result<(), ExecError> {
        Ok(())
    }

    #[test]
    fn test_register_and_exists() {
        let mut registry = ExecRegistry::new();
        registry.register("noop", noop);
        assert!(registry.exists("noop"));
        assert!(!registry.exists("other"));
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_panics() {
        let mut registry = ExecRegistry::new();
        registry.register("noop", noop);
        registry.register("noop", noop);
    }

    #[test]
    #[should_panic(expected = "empty exec name")]
    fn test_empty_name_panics() {
        let mut registry = ExecRegistry::new();
        registry.register(" ", noop);
    }

    #[test]
    fn test_default_registry_has_samples() {
        let registry = default_registry();
        assert!(registry.exists("sample_pass"));
        assert!(registry.exists("sample_fail"));
        assert!(registry.exists("sample_sleep"));
    }
}
