//! Orchestration of chat turns: streaming, tool dispatch and reconciliation

pub mod builder;
pub mod sink;
pub mod turn;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::MessageBuilder;
pub use sink::EventSink;
pub use turn::{Orchestrator, TurnOutcome, TurnRequest, TurnState};
