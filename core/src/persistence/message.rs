//! Persisted chat messages

use crate::llm::{LlmMessage, MessageRole, Usage};
use crate::tools::{ToolCall, ToolCallResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a stored message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Turn still running; content is partial
    Streaming,
    Complete,
    /// Cancelled, disconnected or failed; content is partial
    Interrupted,
    /// Stopped after reaching the tool round limit
    MaxToolRounds,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Streaming => "streaming",
            MessageStatus::Complete => "complete",
            MessageStatus::Interrupted => "interrupted",
            MessageStatus::MaxToolRounds => "max_tool_rounds",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

/// A user or assistant message as stored by the repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Tool calls actually executed, in issuance order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolCallResult>,

    pub status: MessageStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    fn new(
        conversation_id: &str,
        user_id: &str,
        role: MessageRole,
        content: String,
        status: MessageStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content,
            thinking: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            status,
            usage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A finished user message
    pub fn user<S: Into<String>>(conversation_id: &str, user_id: &str, content: S) -> Self {
        Self::new(
            conversation_id,
            user_id,
            MessageRole::User,
            content.into(),
            MessageStatus::Complete,
        )
    }

    /// An empty assistant message for a turn that is about to stream
    pub fn assistant_placeholder(conversation_id: &str, user_id: &str) -> Self {
        Self::new(
            conversation_id,
            user_id,
            MessageRole::Assistant,
            String::new(),
            MessageStatus::Streaming,
        )
    }

    /// Context entry for later turns.
    ///
    /// Only the final text is replayed; tool round-trips of earlier turns
    /// stay out of the prompt. Empty assistant messages yield `None`.
    pub fn to_llm_message(&self) -> Option<LlmMessage> {
        match self.role {
            MessageRole::User => Some(LlmMessage::user(self.content.clone())),
            MessageRole::Assistant if !self.content.is_empty() => {
                Some(LlmMessage::assistant(self.content.clone()))
            }
            _ => None,
        }
    }
}
