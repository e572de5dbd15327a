//! OpenAI-compatible streaming client built on reqwest-eventsource

use crate::config::ResolvedLlmConfig;
use crate::error::{Error, LlmError, Result};
use crate::llm::{
    ChatRequest, ContentBlock, FinishReason, LlmClient, LlmMessage, LlmStream, LlmStreamChunk,
    MessageContent, MessageRole, ToolCallDelta, ToolDefinition, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OpenAI client speaking the chat completions streaming protocol
pub struct OpenAiClient {
    http: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    headers: HashMap<String, String>,
}

impl OpenAiClient {
    /// Create a new OpenAI client from resolved LLM config
    pub fn new(config: &ResolvedLlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Llm(LlmError::Authentication {
                message: "No API key found for OpenAI".to_string(),
            }));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            headers: config.headers.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the wire request body
    fn build_body(&self, request: ChatRequest) -> WireRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools)
        };

        WireRequest {
            model: self.model.clone(),
            messages: convert_messages(request.messages),
            tools,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            stop: request.options.stop,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<LlmStream> {
        let body = self.build_body(request);

        if let Some(ref tools) = body.tools {
            tracing::debug!("OpenAI request with {} tools enabled", tools.len());
        }

        let mut builder = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let source = EventSource::new(builder).map_err(|e| LlmError::InvalidRequest {
            message: format!("Failed to build request: {}", e),
        })?;

        // The event source reconnects on its own after errors; a chat
        // completion must not be replayed, so the first error or [DONE]
        // closes it for good.
        let stream = futures::stream::unfold(Some(source), |state| async move {
            let mut source = state?;
            loop {
                match source.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if message.data.trim() == "[DONE]" {
                            source.close();
                            return None;
                        }
                        return Some((parse_chunk(&message.data), Some(source)));
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        source.close();
                        return None;
                    }
                    Some(Err(e)) => {
                        tracing::error!("OpenAI stream failed: {}", e);
                        source.close();
                        return Some((Err(map_stream_error(e)), None));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

fn map_stream_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => match status.as_u16() {
            401 | 403 => LlmError::Authentication {
                message: format!("Provider rejected credentials ({})", status),
            }
            .into(),
            code => LlmError::ApiError {
                status: code,
                message: status.to_string(),
            }
            .into(),
        },
        reqwest_eventsource::Error::Transport(e) => LlmError::Network {
            message: e.to_string(),
        }
        .into(),
        other => LlmError::Network {
            message: other.to_string(),
        }
        .into(),
    }
}

/// Convert our internal message format to the wire format
fn convert_messages(messages: Vec<LlmMessage>) -> Vec<WireMessage> {
    let mut converted = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System | MessageRole::User => {
                let role = if message.role == MessageRole::System {
                    "system"
                } else {
                    "user"
                };
                converted.push(WireMessage {
                    role,
                    content: Some(message.get_text().unwrap_or_default()),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            MessageRole::Assistant => {
                let mut tool_calls = Vec::new();
                if let MessageContent::Blocks(blocks) = &message.content {
                    for block in blocks {
                        if let ContentBlock::ToolUse {
                            id,
                            name,
                            arguments,
                        } = block
                        {
                            tool_calls.push(WireToolCall {
                                id: id.clone(),
                                call_type: "function",
                                function: WireFunctionCall {
                                    name: name.clone(),
                                    arguments: arguments.clone(),
                                },
                            });
                        }
                    }
                }

                converted.push(WireMessage {
                    role: "assistant",
                    content: message.get_text().filter(|text| !text.is_empty()),
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                    tool_call_id: None,
                });
            }
            MessageRole::Tool => {
                if let MessageContent::Blocks(blocks) = &message.content {
                    for block in blocks {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = block
                        {
                            converted.push(WireMessage {
                                role: "tool",
                                content: Some(content.clone()),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            });
                        }
                    }
                }
            }
        }
    }

    converted
}

/// Convert one SSE data payload to our internal chunk format
fn parse_chunk(data: &str) -> Result<LlmStreamChunk> {
    let chunk: WireChunk = serde_json::from_str(data).map_err(|e| LlmError::MalformedChunk {
        message: format!("{}: {}", e, data),
    })?;

    let choice = chunk.choices.into_iter().next();
    let usage = chunk.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let Some(choice) = choice else {
        return Ok(LlmStreamChunk {
            usage,
            ..Default::default()
        });
    };

    let tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            ToolCallDelta {
                index: call.index,
                id: call.id.filter(|id| !id.is_empty()),
                name: name.filter(|name| !name.is_empty()),
                arguments,
            }
        })
        .collect();

    Ok(LlmStreamChunk {
        reasoning: choice
            .delta
            .reasoning_content
            .or(choice.delta.reasoning)
            .filter(|text| !text.is_empty()),
        delta: choice.delta.content.filter(|text| !text.is_empty()),
        tool_calls,
        finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
        usage,
    })
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
