//! # fleet-recovery
//!
//! Plan-driven verify and repair engine for lab devices.
//!
//! A run loads a JSON configuration of plans, reads each resource of a unit
//! from inventory and executes the plans against it. Every action is a
//! registered exec leaf; failed leaves may be repaired by recovery actions
//! and re-run.
//!
//! ## Modules
//!
//! - `app` - Application configuration and logging setup
//! - `components` - Runners, pingers and device clients used by exec leaves
//! - `config` - Plan configuration model, loader and validation
//! - `engine` - Executes one plan against one resource
//! - `error` - Tagged exec errors and crate error types
//! - `execs` - Exec registry, exec context, argument parser and built-in leaves
//! - `metrics` - Action records and metrics sinks
//! - `recovery` - Orchestrates plans over the resources of a unit
//! - `retry` - Bounded retry helpers
//! - `tlw` - Access capability to the lab, device model and a mock
pub mod app;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod execs;
pub mod metrics;
pub mod recovery;
pub mod retry;
pub mod tlw;


pub use error::{ExecError, RecoveryError, Result};
pub use recovery::{run, RecoveryArgs, RunReport, TaskName};
