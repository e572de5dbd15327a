//! Minimal configuration module for loomchat core
//!
//! Only exports pure data types. All loading logic is in CLI layer.

pub mod types;

pub use types::{ModelParams, OrchestratorConfig, Protocol, ResolvedLlmConfig};
