//! LLM client abstractions and implementations

pub mod client;
pub mod message;
pub mod providers;

pub use client::{
    ChatOptions, ChatRequest, FinishReason, FunctionDefinition, LlmClient, LlmStream,
    LlmStreamChunk, ToolCallDelta, ToolDefinition, Usage,
};
pub use message::{ContentBlock, LlmMessage, MessageContent, MessageRole};
pub use providers::*;
