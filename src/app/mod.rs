//! Application module
//!
//! Process-level settings for hosting recovery runs: configuration and
//! logging setup.

pub mod config;
pub mod logging;

pub use config::{AppConfig, EngineConfig, LogFormat, MetricsConfig, MetricsKind};
pub use logging::init_logging;
