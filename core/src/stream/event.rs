//! Events pushed to the browser over the chat stream

use crate::tools::{ToolCall, ToolCallResult};
use serde::{Deserialize, Serialize};

/// One server-sent event of a chat turn.
///
/// Serialized with a `type` tag; the same tag is used as the SSE event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    /// First event of every turn
    Connected {
        turn_id: String,
        conversation_id: String,
        message_id: String,
    },

    /// Incremental reasoning text
    Thinking { content: String },

    /// Incremental answer text
    Answer { content: String },

    /// Tool calls requested by the model; output pauses until results exist
    ToolCalls { tool_calls: Vec<WireToolCall> },

    /// Result of one tool call, sent as soon as its batch has settled
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },

    /// Turn-level failure, always followed by `done`
    Error { error: String, code: String },

    /// Terminal event of every turn
    Done { message_id: String, status: String },
}

impl SseEvent {
    /// Event name used on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            SseEvent::Connected { .. } => "connected",
            SseEvent::Thinking { .. } => "thinking",
            SseEvent::Answer { .. } => "answer",
            SseEvent::ToolCalls { .. } => "tool_calls",
            SseEvent::ToolResult { .. } => "tool_result",
            SseEvent::Error { .. } => "error",
            SseEvent::Done { .. } => "done",
        }
    }

    pub fn tool_calls(calls: &[ToolCall]) -> Self {
        SseEvent::ToolCalls {
            tool_calls: calls.iter().map(WireToolCall::from).collect(),
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        SseEvent::ToolResult {
            tool_call_id: result.tool_call_id.clone(),
            content: result.content.clone(),
            is_error: result.is_error,
        }
    }
}

/// Tool call in the OpenAI function-calling shape the browser expects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFunction {
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: "function".to_string(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.raw_arguments.clone(),
            },
        }
    }
}
