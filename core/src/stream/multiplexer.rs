//! Classifies provider chunks into thinking, answer and tool call events
//!
//! One multiplexer lives for a whole turn. Each segment of model output runs
//! until the provider closes it; if tool calls were requested the
//! multiplexer emits them once, suspends, and only opens the next segment
//! when the caller hands the results back through [`StreamMultiplexer::resume`].

use crate::error::{ToolError, TurnError};
use crate::llm::{
    ContentBlock, FinishReason, LlmMessage, LlmStreamChunk, MessageContent, MessageRole,
    ToolCallDelta, Usage,
};
use crate::tools::{ToolCall, ToolCallResult};
use std::collections::{HashMap, HashSet};

/// Typed output of the multiplexer
#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent {
    Thinking(String),
    Answer(String),
    /// Every call of the segment, in provider order
    ToolCalls(Vec<PreparedCall>),
}

/// A closed tool call with its parsed arguments
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub call: ToolCall,
    pub arguments: Result<serde_json::Value, ToolError>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Per-turn stream classifier
#[derive(Debug, Default)]
pub struct StreamMultiplexer {
    thinking: String,
    answer: String,
    // Calls in order of first appearance; `slots` maps provider index to position
    pending: Vec<PendingCall>,
    slots: HashMap<usize, usize>,
    issued: Vec<ToolCall>,
    seen_ids: HashSet<String>,
    suspended: bool,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    dropped_chunks: usize,
}

impl StreamMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one provider chunk
    pub fn push(&mut self, chunk: LlmStreamChunk) -> Result<Vec<MuxEvent>, TurnError> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        if self.suspended {
            self.dropped_chunks += 1;
            tracing::trace!("Dropping chunk while waiting for tool results");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        if let Some(reasoning) = chunk.reasoning.filter(|text| !text.is_empty()) {
            self.thinking.push_str(&reasoning);
            events.push(MuxEvent::Thinking(reasoning));
        }

        if let Some(delta) = chunk.delta.filter(|text| !text.is_empty()) {
            self.answer.push_str(&delta);
            events.push(MuxEvent::Answer(delta));
        }

        for delta in chunk.tool_calls {
            self.accumulate(delta);
        }

        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
            if !self.pending.is_empty() {
                events.push(self.close_calls()?);
            }
        }

        Ok(events)
    }

    /// Close the segment because the provider stream ended
    pub fn finish(&mut self) -> Result<Option<MuxEvent>, TurnError> {
        if self.suspended || self.pending.is_empty() {
            return Ok(None);
        }
        self.close_calls().map(Some)
    }

    fn accumulate(&mut self, delta: ToolCallDelta) {
        let id = delta.id.filter(|id| !id.is_empty());
        let name = delta.name.filter(|name| !name.is_empty());

        // Some providers reuse index 0 for every call and tell them apart by id
        let starts_new_call = match (self.slots.get(&delta.index), &id) {
            (None, _) => true,
            (Some(&position), Some(id)) => self.pending[position]
                .id
                .as_ref()
                .is_some_and(|existing| existing != id),
            (Some(_), None) => false,
        };

        if starts_new_call {
            self.slots.insert(delta.index, self.pending.len());
            self.pending.push(PendingCall::default());
        }

        let Some(&position) = self.slots.get(&delta.index) else {
            return;
        };
        let call = &mut self.pending[position];
        if call.id.is_none() {
            call.id = id;
        }
        if call.name.is_none() {
            call.name = name;
        }
        call.arguments.push_str(&delta.arguments);
    }

    fn close_calls(&mut self) -> Result<MuxEvent, TurnError> {
        let mut prepared = Vec::with_capacity(self.pending.len());

        for (position, pending) in self.pending.drain(..).enumerate() {
            let (Some(id), Some(name)) = (pending.id, pending.name) else {
                return Err(TurnError::ProtocolViolation {
                    message: format!("tool call #{position} never received an id and a name"),
                });
            };

            if !self.seen_ids.insert(id.clone()) {
                return Err(TurnError::ProtocolViolation {
                    message: format!("duplicate tool call id in turn: {id}"),
                });
            }

            let call = ToolCall::new(id, name, pending.arguments);
            let arguments = call.parse_arguments();
            if let Err(ref e) = arguments {
                tracing::debug!(tool_call_id = %call.id, error = %e, "Tool call arguments did not parse");
            }
            prepared.push(PreparedCall { call, arguments });
        }

        self.slots.clear();
        self.issued = prepared.iter().map(|p| p.call.clone()).collect();
        self.suspended = true;
        Ok(MuxEvent::ToolCalls(prepared))
    }

    /// Feed tool results back and open the next segment.
    ///
    /// Returns the context to append for the model: the assistant message for
    /// the closed segment, then one tool message per call in issuance order.
    pub fn resume(&mut self, results: &[ToolCallResult]) -> Result<Vec<LlmMessage>, TurnError> {
        if !self.suspended {
            return Err(TurnError::ProtocolViolation {
                message: "resume called without pending tool calls".to_string(),
            });
        }

        let by_id: HashMap<&str, &ToolCallResult> = results
            .iter()
            .map(|result| (result.tool_call_id.as_str(), result))
            .collect();

        let mut blocks = Vec::with_capacity(self.issued.len() + 1);
        if !self.answer.is_empty() {
            blocks.push(ContentBlock::Text {
                text: self.answer.clone(),
            });
        }
        blocks.extend(self.issued.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.raw_arguments.clone(),
        }));

        let mut messages = vec![LlmMessage {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(blocks),
        }];

        for call in &self.issued {
            let Some(result) = by_id.get(call.id.as_str()) else {
                return Err(TurnError::ProtocolViolation {
                    message: format!("no result supplied for tool call {}", call.id),
                });
            };
            messages.push(LlmMessage::tool_result(
                call.id.clone(),
                result.content.clone(),
                result.is_error,
            ));
        }

        if self.dropped_chunks > 0 {
            tracing::debug!(dropped = self.dropped_chunks, "Segment output dropped after tool calls");
        }

        self.thinking.clear();
        self.answer.clear();
        self.issued.clear();
        self.suspended = false;
        self.finish_reason = None;
        self.dropped_chunks = 0;

        Ok(messages)
    }

    /// Whether tool calls were emitted and results are still outstanding
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    /// Answer text of the current segment
    pub fn segment_answer(&self) -> &str {
        &self.answer
    }

    /// Usage reported for the current segment, if any; resets it
    pub fn take_usage(&mut self) -> Option<Usage> {
        self.usage.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calls_of(event: &MuxEvent) -> &[PreparedCall] {
        match event {
            MuxEvent::ToolCalls(calls) => calls,
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_text_forwarded_in_arrival_order() {
        let mut mux = StreamMultiplexer::new();
        let mut chunk = LlmStreamChunk::reasoning("look up ");
        chunk.delta = Some("It is".to_string());

        let events = mux.push(chunk).unwrap();
        assert_eq!(
            events,
            vec![
                MuxEvent::Thinking("look up ".to_string()),
                MuxEvent::Answer("It is".to_string())
            ]
        );
        assert_eq!(
            mux.push(LlmStreamChunk::answer(" sunny")).unwrap(),
            vec![MuxEvent::Answer(" sunny".to_string())]
        );
        assert!(mux.push(LlmStreamChunk::finish(FinishReason::Stop)).unwrap().is_empty());
        assert_eq!(mux.segment_answer(), "It is sunny");
        assert!(!mux.is_suspended());
    }

    #[test]
    fn test_tool_call_fragments_close_on_finish() {
        let mut mux = StreamMultiplexer::new();
        assert!(mux
            .push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "1", "web_search", "{\"q\":")))
            .unwrap()
            .is_empty());
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::more(0, "\"weather\"}")))
            .unwrap();

        let events = mux
            .push(LlmStreamChunk::finish(FinishReason::ToolCalls))
            .unwrap();
        assert_eq!(events.len(), 1);
        let calls = calls_of(&events[0]);
        assert_eq!(calls[0].call.id, "1");
        assert_eq!(calls[0].call.raw_arguments, r#"{"q":"weather"}"#);
        assert_eq!(calls[0].arguments, Ok(json!({"q": "weather"})));
        assert!(mux.is_suspended());

        // Output after the tool calls is held back
        assert!(mux.push(LlmStreamChunk::answer("late")).unwrap().is_empty());
    }

    #[test]
    fn test_provider_order_with_interleaved_fragments() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "a", "web_search", "{")))
            .unwrap();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(1, "b", "current_time", "")))
            .unwrap();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::more(0, "}")))
            .unwrap();

        let event = mux.finish().unwrap().unwrap();
        let ids: Vec<&str> = calls_of(&event).iter().map(|p| p.call.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(calls_of(&event).iter().all(|p| p.arguments.is_ok()));
    }

    #[test]
    fn test_reused_index_with_new_id_is_a_new_call() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "a", "web_search", "{}")))
            .unwrap();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "b", "web_search", "{}")))
            .unwrap();

        let event = mux.finish().unwrap().unwrap();
        assert_eq!(calls_of(&event).len(), 2);
    }

    #[test]
    fn test_parse_failure_is_attached_to_one_call() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "1", "web_search", "{\"q\":")))
            .unwrap();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(1, "2", "current_time", "{}")))
            .unwrap();

        let events = mux
            .push(LlmStreamChunk::finish(FinishReason::ToolCalls))
            .unwrap();
        let calls = calls_of(&events[0]);
        assert!(matches!(calls[0].arguments, Err(ToolError::ArgumentParse { .. })));
        assert!(calls[1].arguments.is_ok());
    }

    #[test]
    fn test_nameless_call_is_a_protocol_violation() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::more(0, "{}")))
            .unwrap();
        assert!(matches!(
            mux.finish(),
            Err(TurnError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_resume_orders_results_by_issuance() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::answer("Checking. ")).unwrap();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "A", "web_search", "{}")))
            .unwrap();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(1, "B", "web_search", "{}")))
            .unwrap();
        mux.finish().unwrap();

        // B finished first
        let results = vec![
            ToolCallResult::success("B", crate::tools::ToolOutput::text("b")),
            ToolCallResult::success("A", crate::tools::ToolOutput::text("a")),
        ];
        let messages = mux.resume(&results).unwrap();

        assert_eq!(messages.len(), 3);
        assert!(messages[0].has_tool_use());
        assert_eq!(messages[0].get_text().as_deref(), Some("Checking. "));
        assert_eq!(
            messages[1],
            LlmMessage::tool_result("A", "a", false)
        );
        assert_eq!(
            messages[2],
            LlmMessage::tool_result("B", "b", false)
        );
        assert!(!mux.is_suspended());
        assert_eq!(mux.segment_answer(), "");

        // Next segment flows again
        assert_eq!(
            mux.push(LlmStreamChunk::answer("Done")).unwrap(),
            vec![MuxEvent::Answer("Done".to_string())]
        );
    }

    #[test]
    fn test_duplicate_id_across_segments() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "1", "web_search", "{}")))
            .unwrap();
        mux.finish().unwrap();
        mux.resume(&[ToolCallResult::success("1", crate::tools::ToolOutput::text("x"))])
            .unwrap();

        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "1", "web_search", "{}")))
            .unwrap();
        assert!(matches!(
            mux.finish(),
            Err(TurnError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_usage_recorded_even_while_suspended() {
        let mut mux = StreamMultiplexer::new();
        mux.push(LlmStreamChunk::tool_call(ToolCallDelta::open(0, "1", "web_search", "{}")))
            .unwrap();
        mux.push(LlmStreamChunk::finish(FinishReason::ToolCalls))
            .unwrap();

        let usage_only = LlmStreamChunk {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            ..Default::default()
        };
        mux.push(usage_only).unwrap();
        assert_eq!(mux.take_usage().map(|u| u.total_tokens), Some(15));
        assert!(mux.take_usage().is_none());
    }
}
