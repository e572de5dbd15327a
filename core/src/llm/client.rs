//! LLM client trait and streaming structures

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use super::message::LlmMessage;

/// Boxed stream of provider chunks; dropping it aborts the connection
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamChunk>> + Send>>;

/// Trait for LLM clients
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Open a streaming chat completion
    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<LlmStream>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// One request to the model provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Full conversation context for this segment
    pub messages: Vec<LlmMessage>,

    /// Tools advertised to the model
    pub tools: Vec<ToolDefinition>,

    /// Generation options
    pub options: ChatOptions,
}

/// Streaming chunk from an LLM
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmStreamChunk {
    /// Reasoning delta
    pub reasoning: Option<String>,

    /// Answer delta
    pub delta: Option<String>,

    /// Partial tool calls in this chunk
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Finish reason if this is the last chunk of the segment
    pub finish_reason: Option<FinishReason>,

    /// Usage statistics (usually only in the last chunk)
    pub usage: Option<Usage>,
}

impl LlmStreamChunk {
    pub fn reasoning<S: Into<String>>(text: S) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn answer<S: Into<String>>(text: S) -> Self {
        Self {
            delta: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }
}

/// A fragment of one tool call as streamed by the provider.
///
/// The first fragment of a call carries its `id` and `name`; later fragments
/// for the same `index` only carry more argument text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDelta {
    /// Position of the call within the provider's tool call list
    pub index: usize,

    pub id: Option<String>,

    pub name: Option<String>,

    /// Raw argument text to append
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallDelta {
    /// Opening fragment of a call
    pub fn open<I: Into<String>, N: Into<String>, A: Into<String>>(
        index: usize,
        id: I,
        name: N,
        arguments: A,
    ) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: arguments.into(),
        }
    }

    /// Continuation fragment carrying more argument text
    pub fn more<A: Into<String>>(index: usize, arguments: A) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: arguments.into(),
        }
    }
}

/// Usage statistics for a request
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,

    /// Number of tokens in the completion
    pub completion_tokens: u32,

    /// Total number of tokens
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Reason why generation finished
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Generation completed naturally
    Stop,

    /// Hit the maximum token limit
    Length,

    /// Model decided to call a tool
    ToolCalls,

    /// Content was filtered
    ContentFilter,

    /// Other reason
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Type of tool (usually "function")
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tool calling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    /// Name of the function
    pub name: String,

    /// Description of what the function does
    pub description: String,

    /// JSON schema for the function parameters
    pub parameters: serde_json::Value,
}

/// Options for chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Temperature for generation
    pub temperature: Option<f32>,

    /// Top-p sampling parameter
    pub top_p: Option<f32>,

    /// Stop sequences
    pub stop: Option<Vec<String>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(8192),
            temperature: Some(0.7),
            top_p: Some(1.0),
            stop: None,
        }
    }
}

impl From<&crate::config::ModelParams> for ChatOptions {
    fn from(params: &crate::config::ModelParams) -> Self {
        let defaults = ChatOptions::default();
        Self {
            max_tokens: params.max_tokens.or(defaults.max_tokens),
            temperature: params.temperature.or(defaults.temperature),
            top_p: params.top_p.or(defaults.top_p),
            stop: params.stop_sequences.clone(),
        }
    }
}
