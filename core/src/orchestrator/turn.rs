//! The per-turn driver
//!
//! A turn alternates between streaming a model segment and running the tool
//! calls that segment requested:
//!
//! ```text
//! Streaming -> AwaitingTools -> Resuming -> Streaming -> ... -> Completed
//!     \              \                                   \-> MaxToolRounds
//!      \--------------\--> Cancelled
//! ```
//!
//! Everything for one turn happens on one task. Tool calls of a batch run
//! concurrently on the execution tracker and are joined before the next
//! segment opens.

use super::builder::MessageBuilder;
use super::sink::EventSink;
use crate::config::OrchestratorConfig;
use crate::error::{Result, ToolError, TurnError};
use crate::llm::{ChatOptions, ChatRequest, LlmClient, LlmMessage, ToolDefinition, Usage};
use crate::persistence::{Message, MessageRepository, MessageStatus};
use crate::stream::{MuxEvent, PreparedCall, SseEvent, StreamMultiplexer};
use crate::tools::{
    ExecutionHandle, ExecutionLimits, ToolCall, ToolCallResult, ToolExecutionTracker, ToolRegistry,
};
use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One user message to answer
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub turn_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub content: String,
}

impl TurnRequest {
    pub fn new<C: Into<String>, U: Into<String>, M: Into<String>>(
        conversation_id: C,
        user_id: U,
        content: M,
    ) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            content: content.into(),
        }
    }
}

/// Orchestration state of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Streaming,
    AwaitingTools,
    Resuming,
    Completed,
    Cancelled,
    MaxToolRounds,
}

impl TurnState {
    /// Status of the persisted message for a terminal state
    pub fn message_status(&self) -> MessageStatus {
        match self {
            TurnState::Completed => MessageStatus::Complete,
            TurnState::MaxToolRounds => MessageStatus::MaxToolRounds,
            TurnState::Cancelled => MessageStatus::Interrupted,
            TurnState::Streaming | TurnState::AwaitingTools | TurnState::Resuming => {
                MessageStatus::Streaming
            }
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub message_id: String,
    pub state: TurnState,
    pub tool_rounds: usize,
    pub usage: Usage,
    /// Set when the turn ended on a stream or protocol failure
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn status(&self) -> MessageStatus {
        self.state.message_status()
    }
}

enum SegmentEnd {
    /// Provider closed the segment; carries the tool calls it requested
    Finished(Option<Vec<PreparedCall>>),
    Cancelled,
    Failed(TurnError),
}

enum Dispatched {
    Immediate(ToolCallResult),
    Running(ExecutionHandle),
}

struct Batch {
    results: Vec<ToolCallResult>,
    // A call was cancelled on its own while the turn itself was not
    cancelled_by_request: bool,
}

/// Drives chat turns against one provider, registry and tracker
pub struct Orchestrator {
    client: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    tracker: Arc<ToolExecutionTracker>,
    repository: Arc<dyn MessageRepository>,
    config: OrchestratorConfig,
    options: ChatOptions,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        tracker: Arc<ToolExecutionTracker>,
        repository: Arc<dyn MessageRepository>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            registry,
            tracker,
            repository,
            config,
            options: ChatOptions::default(),
        }
    }

    /// Set generation options sent with every segment
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tracker(&self) -> &Arc<ToolExecutionTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn MessageRepository> {
        &self.repository
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one turn to a terminal state.
    ///
    /// Events go to `sink` in production order and always end with `done`
    /// unless the client disconnected. Cancelling `cancel` aborts the provider
    /// stream and every tool call of the turn.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        tracing::info!(
            turn_id = %request.turn_id,
            conversation_id = %request.conversation_id,
            model = %self.client.model_name(),
            "Turn started"
        );

        let mut builder = MessageBuilder::new(&request.conversation_id, &request.user_id);
        sink.send(SseEvent::Connected {
            turn_id: request.turn_id.clone(),
            conversation_id: request.conversation_id.clone(),
            message_id: builder.id().to_string(),
        })
        .await;

        let mut context = match self.prepare_context(&request, &mut builder).await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(turn_id = %request.turn_id, error = %e, "Failed to prepare turn");
                sink.send(SseEvent::Error {
                    error: e.to_string(),
                    code: "PERSISTENCE_FAILED".to_string(),
                })
                .await;
                sink.send(SseEvent::Done {
                    message_id: builder.id().to_string(),
                    status: MessageStatus::Interrupted.as_str().to_string(),
                })
                .await;
                return Err(e);
            }
        };

        let tools = self.registry.list_schemas();
        let mut mux = StreamMultiplexer::new();
        let mut usage = Usage::default();
        let mut rounds = 0usize;
        let mut state = TurnState::Streaming;
        let mut failure: Option<TurnError> = None;

        loop {
            let end = self
                .stream_segment(&context, &tools, &mut mux, &mut builder, &sink, &cancel)
                .await;
            if let Some(segment_usage) = mux.take_usage() {
                usage.add(&segment_usage);
            }

            let calls = match end {
                SegmentEnd::Finished(Some(calls)) => calls,
                SegmentEnd::Finished(None) => {
                    transition(&request.turn_id, &mut state, TurnState::Completed);
                    break;
                }
                SegmentEnd::Cancelled => {
                    transition(&request.turn_id, &mut state, TurnState::Cancelled);
                    break;
                }
                SegmentEnd::Failed(e) => {
                    failure = Some(e);
                    transition(&request.turn_id, &mut state, TurnState::Cancelled);
                    break;
                }
            };

            transition(&request.turn_id, &mut state, TurnState::AwaitingTools);
            rounds += 1;

            let batch = self.dispatch(calls, &request.turn_id, &cancel).await;
            for result in &batch.results {
                sink.send(SseEvent::tool_result(result)).await;
                builder.record_tool_result(result.clone());
            }
            self.persist_progress(&mut builder).await;

            if cancel.is_cancelled() {
                transition(&request.turn_id, &mut state, TurnState::Cancelled);
                break;
            }
            if batch.cancelled_by_request && !self.config.resume_after_tool_cancel {
                tracing::info!(turn_id = %request.turn_id, "Tool call cancelled by request, ending turn");
                transition(&request.turn_id, &mut state, TurnState::Cancelled);
                break;
            }
            if rounds >= self.config.max_tool_rounds {
                tracing::warn!(
                    turn_id = %request.turn_id,
                    max_tool_rounds = self.config.max_tool_rounds,
                    "Tool round limit reached"
                );
                transition(&request.turn_id, &mut state, TurnState::MaxToolRounds);
                break;
            }

            transition(&request.turn_id, &mut state, TurnState::Resuming);
            match mux.resume(&batch.results) {
                Ok(messages) => context.extend(messages),
                Err(e) => {
                    failure = Some(e);
                    transition(&request.turn_id, &mut state, TurnState::Cancelled);
                    break;
                }
            }
            transition(&request.turn_id, &mut state, TurnState::Streaming);
        }

        if let Some(ref e) = failure {
            tracing::error!(turn_id = %request.turn_id, error = %e, "Turn ended on failure");
            sink.send(SseEvent::Error {
                error: e.to_string(),
                code: error_code(e).to_string(),
            })
            .await;
        }

        let status = state.message_status();
        let message_id = builder.id().to_string();
        let message = builder.finish(status, usage);
        if let Err(e) = self.repository.update(&message).await {
            tracing::error!(turn_id = %request.turn_id, error = %e, "Failed to persist final message");
        }

        sink.send(SseEvent::Done {
            message_id: message_id.clone(),
            status: status.as_str().to_string(),
        })
        .await;

        tracing::info!(
            turn_id = %request.turn_id,
            status = status.as_str(),
            tool_rounds = rounds,
            total_tokens = usage.total_tokens,
            "Turn finished"
        );

        Ok(TurnOutcome {
            turn_id: request.turn_id,
            message_id,
            state,
            tool_rounds: rounds,
            usage,
            error: failure.map(|e| e.to_string()),
        })
    }

    /// Load history and write the user message plus the assistant placeholder
    async fn prepare_context(
        &self,
        request: &TurnRequest,
        builder: &mut MessageBuilder,
    ) -> Result<Vec<LlmMessage>> {
        let history = self
            .repository
            .list_by_conversation(&request.conversation_id)
            .await?;

        let mut context = Vec::with_capacity(history.len() + 2);
        if let Some(ref prompt) = self.config.system_prompt {
            context.push(LlmMessage::system(prompt.clone()));
        }
        context.extend(
            history
                .iter()
                .filter(|message| message.status.is_final())
                .filter_map(Message::to_llm_message),
        );
        context.push(LlmMessage::user(request.content.clone()));

        let user_message = Message::user(
            &request.conversation_id,
            &request.user_id,
            request.content.clone(),
        );
        self.repository.create(&user_message).await?;
        self.repository.create(builder.snapshot()).await?;

        Ok(context)
    }

    async fn stream_segment(
        &self,
        context: &[LlmMessage],
        tools: &[ToolDefinition],
        mux: &mut StreamMultiplexer,
        builder: &mut MessageBuilder,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> SegmentEnd {
        let request = ChatRequest {
            messages: context.to_vec(),
            tools: tools.to_vec(),
            options: self.options.clone(),
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SegmentEnd::Cancelled,
            opened = self.client.chat_completion_stream(request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open provider stream");
                return SegmentEnd::Failed(TurnError::StreamAborted {
                    reason: e.to_string(),
                });
            }
        };

        let mut calls = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Aborting provider stream");
                    return SegmentEnd::Cancelled;
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) if mux.is_suspended() => {
                    tracing::warn!(error = %e, "Provider stream failed after tool calls closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Provider stream failed");
                    return SegmentEnd::Failed(TurnError::StreamAborted {
                        reason: e.to_string(),
                    });
                }
            };

            let events = match mux.push(chunk) {
                Ok(events) => events,
                Err(e) => return SegmentEnd::Failed(e),
            };
            for event in events {
                if let Some(closed) = forward(event, builder, sink).await {
                    calls = Some(closed);
                }
            }
        }

        match mux.finish() {
            Ok(Some(event)) => {
                if let Some(closed) = forward(event, builder, sink).await {
                    calls = Some(closed);
                }
            }
            Ok(None) => {}
            Err(e) => return SegmentEnd::Failed(e),
        }

        tracing::debug!(finish_reason = ?mux.finish_reason(), "Segment closed");
        SegmentEnd::Finished(calls)
    }

    /// Start every call of a batch and join them in issuance order
    async fn dispatch(
        &self,
        calls: Vec<PreparedCall>,
        turn_id: &str,
        turn: &CancellationToken,
    ) -> Batch {
        let limits = ExecutionLimits::from(&self.config);
        let started: Vec<Dispatched> = calls
            .into_iter()
            .map(|prepared| self.start_call(prepared, turn_id, turn, limits))
            .collect();

        let settled = join_all(started.into_iter().map(|dispatched| async move {
            match dispatched {
                Dispatched::Immediate(result) => (result, false),
                Dispatched::Running(handle) => {
                    let settled = handle.wait().await;
                    let cancelled = settled.is_cancelled();
                    (settled.into_result(), cancelled)
                }
            }
        }))
        .await;

        let any_cancelled = settled.iter().any(|(_, cancelled)| *cancelled);
        Batch {
            results: settled.into_iter().map(|(result, _)| result).collect(),
            cancelled_by_request: any_cancelled && !turn.is_cancelled(),
        }
    }

    fn start_call(
        &self,
        prepared: PreparedCall,
        turn_id: &str,
        turn: &CancellationToken,
        limits: ExecutionLimits,
    ) -> Dispatched {
        let PreparedCall { call, arguments } = prepared;

        let arguments = match arguments {
            Ok(arguments) => arguments,
            Err(e) => return Dispatched::Immediate(ToolCallResult::error(call.id, &e)),
        };

        let Some(tool) = self.registry.get(&call.name) else {
            tracing::warn!(tool_call_id = %call.id, tool = %call.name, "Model requested an unknown tool");
            return Dispatched::Immediate(ToolCallResult::error(
                call.id,
                &ToolError::UnknownTool { name: call.name },
            ));
        };

        let started = self
            .tracker
            .start(turn_id, &call.id, &call.name, turn, limits, move |cancel| {
                async move { tool.invoke(arguments, cancel).await }.boxed()
            });

        match started {
            Ok(handle) => Dispatched::Running(handle),
            Err(e) => {
                tracing::error!(tool_call_id = %call.id, error = %e, "Tool call rejected by tracker");
                Dispatched::Immediate(ToolCallResult::error(
                    call.id,
                    &ToolError::failed(call.name, e.to_string()),
                ))
            }
        }
    }

    async fn persist_progress(&self, builder: &mut MessageBuilder) {
        if let Err(e) = self.repository.update(builder.snapshot()).await {
            tracing::warn!(message_id = %builder.id(), error = %e, "Failed to persist partial message");
        }
    }
}

/// Forward events to the client as soon as the multiplexer emits them;
/// closed tool calls are also handed back for dispatch
async fn forward(
    event: MuxEvent,
    builder: &mut MessageBuilder,
    sink: &EventSink,
) -> Option<Vec<PreparedCall>> {
    match event {
        MuxEvent::Thinking(content) => {
            builder.append_thinking(&content);
            sink.send(SseEvent::Thinking { content }).await;
            None
        }
        MuxEvent::Answer(content) => {
            builder.append_answer(&content);
            sink.send(SseEvent::Answer { content }).await;
            None
        }
        MuxEvent::ToolCalls(calls) => {
            let issued: Vec<ToolCall> = calls.iter().map(|p| p.call.clone()).collect();
            builder.record_tool_calls(&issued);
            sink.send(SseEvent::tool_calls(&issued)).await;
            Some(calls)
        }
    }
}

fn transition(turn_id: &str, state: &mut TurnState, next: TurnState) {
    tracing::debug!(turn_id = %turn_id, from = ?state, to = ?next, "Turn state change");
    *state = next;
}

fn error_code(error: &TurnError) -> &'static str {
    match error {
        TurnError::StreamAborted { .. } => "STREAM_ABORTED",
        TurnError::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
        TurnError::Persistence { .. } => "PERSISTENCE_FAILED",
    }
}
