//! Engine Configuration Module
//!
//! Every pipeline threshold, window and weight is loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `ROOTSPHERE_CONFIG` environment variable (path to TOML file)
//! 2. `rootsphere.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is wrapped in an `Arc` and handed to each component
//! explicitly; there is no process-wide config singleton.

mod engine_config;
pub mod validation;

pub use engine_config::*;
