//! Tool system: the tool trait, the startup registry and the execution tracker

pub mod base;
pub mod registry;
pub mod tracker;

pub use base::{Tool, ToolCall, ToolCallResult, ToolOutput};
pub use registry::ToolRegistry;
pub use tracker::{
    ExecutionHandle, ExecutionLimits, ExecutionOutcome, ExecutionTicket, SettledExecution,
    ToolExecutionTracker, ToolTask,
};
