//! Turning provider output into client events

pub mod event;
pub mod multiplexer;

pub use event::{SseEvent, WireFunction, WireToolCall};
pub use multiplexer::{MuxEvent, PreparedCall, StreamMultiplexer};
