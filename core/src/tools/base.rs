//! Base tool traits and structures

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Trait for all tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the name of the tool
    fn name(&self) -> &str;

    /// Get the description of the tool
    fn description(&self) -> &str;

    /// Get the JSON schema for the tool's parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool with parsed arguments.
    ///
    /// Implementations should check `cancel` at their await points and
    /// return [`ToolError::Cancelled`] once it fires. A tool that never looks
    /// at it is detached by the execution tracker when its time budget runs
    /// out.
    async fn invoke(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError>;
}

/// A call to a tool, as requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier of this call, unique within a turn
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Serialized JSON arguments
    pub raw_arguments: String,
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>, A: Into<String>>(
        id: I,
        name: N,
        raw_arguments: A,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }

    /// Parse the raw arguments as a JSON object.
    ///
    /// Models often send an empty string for tools without parameters, which
    /// is treated as `{}`.
    pub fn parse_arguments(&self) -> Result<serde_json::Value, ToolError> {
        if self.raw_arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }

        let value: serde_json::Value =
            serde_json::from_str(&self.raw_arguments).map_err(|e| ToolError::ArgumentParse {
                name: self.name.clone(),
                message: e.to_string(),
            })?;

        if !value.is_object() {
            return Err(ToolError::ArgumentParse {
                name: self.name.clone(),
                message: "arguments must be a JSON object".to_string(),
            });
        }

        Ok(value)
    }
}

/// What a tool produces on success
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    /// Text handed back to the model
    pub content: String,

    /// Optional structured data for the client
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }

    /// Set structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result of one tool call, fed back to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    /// ID of the tool call this is a result for
    pub tool_call_id: String,

    /// Result content
    pub content: String,

    /// Optional structured data
    pub data: Option<serde_json::Value>,

    /// Whether the call failed
    pub is_error: bool,

    /// Execution duration in milliseconds
    pub duration_ms: Option<u64>,
}

impl ToolCallResult {
    /// Create a successful result
    pub fn success<S: Into<String>>(tool_call_id: S, output: ToolOutput) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: output.content,
            data: output.data,
            is_error: false,
            duration_ms: None,
        }
    }

    /// Create an error result
    pub fn error<S: Into<String>>(tool_call_id: S, error: &ToolError) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: format!("Error: {}", error),
            data: None,
            is_error: true,
            duration_ms: None,
        }
    }

    /// Set execution duration
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
