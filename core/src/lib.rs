//! # loomchat Core
//!
//! Core library for loomchat - a streaming chat backend whose model can call
//! tools mid-answer.
//!
//! This library multiplexes a provider stream into thinking, answer and tool
//! call events, runs requested tools concurrently with per-call cancellation,
//! and feeds their results back to the model before it continues.

// Core modules
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod persistence;
pub mod stream;
pub mod tools;

// Re-export commonly used types
pub use config::{ModelParams, OrchestratorConfig, Protocol, ResolvedLlmConfig};
pub use error::{Error, Result};
pub use orchestrator::{EventSink, Orchestrator, TurnOutcome, TurnRequest, TurnState};
pub use persistence::{InMemoryMessageRepository, Message, MessageRepository, MessageStatus};
pub use stream::SseEvent;
pub use tools::{Tool, ToolExecutionTracker, ToolRegistry};

/// Current version of the loomchat-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for the library
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Initialize tracing with a specific debug mode
pub fn init_tracing_with_debug(debug: bool) {
    let filter = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
