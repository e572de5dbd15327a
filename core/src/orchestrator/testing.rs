//! Scripted provider and tools for turn tests

use crate::error::{Error, LlmError, Result, ToolError};
use crate::llm::{ChatRequest, LlmClient, LlmStream, LlmStreamChunk};
use crate::tools::{Tool, ToolOutput};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub(crate) enum Step {
    Chunk(LlmStreamChunk),
    Fail(&'static str),
    /// Keep the stream open forever after the preceding steps
    Hang,
}

/// Replays one script per requested segment
pub(crate) struct ScriptedClient {
    segments: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new(segments: Vec<Vec<Step>>) -> Self {
        Self {
            segments: Mutex::new(segments.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<LlmStream> {
        self.requests.lock().unwrap().push(request);
        let steps = self.segments.lock().unwrap().pop_front().ok_or_else(|| {
            Error::Llm(LlmError::InvalidRequest {
                message: "script exhausted".to_string(),
            })
        })?;

        let hang = steps.iter().any(|step| matches!(step, Step::Hang));
        let items: Vec<Result<LlmStreamChunk>> = steps
            .into_iter()
            .filter_map(|step| match step {
                Step::Chunk(chunk) => Some(Ok(chunk)),
                Step::Fail(message) => Some(Err(Error::Llm(LlmError::Network {
                    message: message.to_string(),
                }))),
                Step::Hang => None,
            })
            .collect();

        let replay = stream::iter(items);
        if hang {
            Ok(Box::pin(replay.chain(stream::pending())))
        } else {
            Ok(Box::pin(replay))
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

#[derive(Clone)]
pub(crate) enum Behavior {
    Reply(&'static str),
    ReplyAfter(&'static str, Duration),
    Fail(&'static str),
    /// Cooperates with cancellation and never finishes otherwise
    WaitForCancel,
    /// Ignores cancellation entirely
    Hang,
}

pub(crate) struct ScriptedTool {
    name: &'static str,
    behavior: Behavior,
    pub(crate) started: Arc<Notify>,
}

impl ScriptedTool {
    pub(crate) fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            behavior,
            started: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "scripted test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"q": {"type": "string"}}})
    }

    async fn invoke(
        &self,
        _args: serde_json::Value,
        cancel: CancellationToken,
    ) -> std::result::Result<ToolOutput, ToolError> {
        self.started.notify_one();
        match self.behavior.clone() {
            Behavior::Reply(text) => Ok(ToolOutput::text(text)),
            Behavior::ReplyAfter(text, delay) => {
                tokio::time::sleep(delay).await;
                Ok(ToolOutput::text(text))
            }
            Behavior::Fail(message) => Err(ToolError::failed(self.name, message)),
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Err(ToolError::Cancelled {
                    name: self.name.to_string(),
                })
            }
            Behavior::Hang => futures::future::pending().await,
        }
    }
}
