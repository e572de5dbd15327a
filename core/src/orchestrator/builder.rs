//! Incremental assembly of the assistant message for one turn

use crate::llm::Usage;
use crate::persistence::{Message, MessageStatus};
use crate::tools::{ToolCall, ToolCallResult};
use chrono::Utc;

/// Accumulates streamed output into the message that gets persisted
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn new(conversation_id: &str, user_id: &str) -> Self {
        Self {
            message: Message::assistant_placeholder(conversation_id, user_id),
        }
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn append_thinking(&mut self, text: &str) {
        self.message
            .thinking
            .get_or_insert_with(String::new)
            .push_str(text);
    }

    pub fn append_answer(&mut self, text: &str) {
        self.message.content.push_str(text);
    }

    pub fn record_tool_calls(&mut self, calls: &[ToolCall]) {
        self.message.tool_calls.extend_from_slice(calls);
    }

    pub fn record_tool_result(&mut self, result: ToolCallResult) {
        self.message.tool_results.push(result);
    }

    /// Current partial message, stamped for an intermediate write
    pub fn snapshot(&mut self) -> &Message {
        self.message.updated_at = Utc::now();
        &self.message
    }

    pub fn finish(mut self, status: MessageStatus, usage: Usage) -> Message {
        self.message.status = status;
        if usage != Usage::default() {
            self.message.usage = Some(usage);
        }
        self.message.updated_at = Utc::now();
        self.message
    }
}
