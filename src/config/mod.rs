//! Inspection Configuration Module
//!
//! Provides station configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `CASTSCOPE_CONFIG` environment variable (path to TOML file)
//! 2. `castscope.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The loaded config is passed explicitly to
//! [`InspectionOrchestrator::open`](crate::orchestrator::InspectionOrchestrator::open);
//! there is no process-wide instance.

mod inspection_config;
pub mod defaults;

pub use inspection_config::*;
