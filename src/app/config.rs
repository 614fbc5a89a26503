//! Application configuration
//!
//! Settings for a process hosting recovery runs: logging, engine defaults
//! and the metrics sink. Read from TOML, then overridden from `RECOVERY_*`
//! environment variables.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::execs::DEFAULT_EXEC_TIMEOUT;
use crate::metrics::{FileMetrics, LogMetrics, MemoryMetrics, Metrics};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Used when an action sets no `exec_timeout`.
    #[serde(with = "humantime_serde")]
    pub default_exec_timeout: Duration,
    /// Budget of a whole run.
    #[serde(with = "humantime_serde")]
    pub run_deadline: Option<Duration>,
    pub enable_recovery: bool,
    pub enable_update_inventory: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_exec_timeout: DEFAULT_EXEC_TIMEOUT,
            run_deadline: None,
            enable_recovery: true,
            enable_update_inventory: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsKind {
    Memory,
    File,
    #[default]
    Log,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(rename = "type")]
    pub kind: MetricsKind,
    pub path: Option<PathBuf>,
}

impl MetricsConfig {
    /// Construct the configured sink; `None` when metrics are disabled.
    pub fn build(&self) -> Result<Option<Arc<dyn Metrics>>> {
        let sink: Arc<dyn Metrics> = match self.kind {
            MetricsKind::None => return Ok(None),
            MetricsKind::Memory => Arc::new(MemoryMetrics::new()),
            MetricsKind::Log => Arc::new(LogMetrics::new()),
            MetricsKind::File => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| anyhow!("metrics: type \"file\" requires a path"))?;
                Arc::new(FileMetrics::new(path.clone()))
            }
        };
        Ok(Some(sink))
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse application configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `RECOVERY_*` overrides read through `lookup`. Unparsable
    /// values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(verbose) = lookup("RECOVERY_VERBOSE").and_then(|v| v.parse().ok()) {
            self.verbose = verbose;
        }
        match lookup("RECOVERY_LOG_FORMAT").as_deref() {
            Some("json") => self.log_format = LogFormat::Json,
            Some("pretty") => self.log_format = LogFormat::Pretty,
            _ => {}
        }
        if let Some(enable) = lookup("RECOVERY_ENABLE_RECOVERY").and_then(|v| v.parse().ok()) {
            self.engine.enable_recovery = enable;
        }
        if let Some(path) = lookup("RECOVERY_METRICS_PATH") {
            self.metrics.kind = MetricsKind::File;
            self.metrics.path = Some(PathBuf::from(path));
        }
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
