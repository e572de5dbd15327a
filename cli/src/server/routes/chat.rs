//! Streaming chat endpoint

use crate::server::auth::AuthenticatedUser;
use crate::server::error::{ApiResult, AppError};
use crate::server::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use futures::{Stream, StreamExt};
use loomchat_core::{EventSink, SseEvent, TurnRequest};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Request body for a new chat turn
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamRequest {
    /// Existing conversation to continue; a new one is started when absent
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Send a message and stream the assistant's turn as server-sent events
pub async fn stream_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<ChatStreamRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(request) = payload.map_err(|e| AppError::invalid_input(e.body_text()))?;
    if request.content.trim().is_empty() {
        return Err(AppError::missing_field("content"));
    }

    let orchestrator = state.orchestrator();
    let conversation_id = match request.conversation_id {
        Some(id) => {
            let existing = orchestrator
                .repository()
                .list_by_conversation(&id)
                .await
                .map_err(|e| AppError::internal_error(e.to_string()))?;
            if existing.iter().any(|message| message.user_id != user.user_id) {
                return Err(AppError::not_found("Conversation"));
            }
            id
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    let turn = TurnRequest::new(conversation_id, user.user_id.clone(), request.content);
    let turn_id = turn.turn_id.clone();
    let cancel = CancellationToken::new();
    let turns = state.turns();
    turns.register(&turn_id, &user.user_id, cancel.clone());
    tracing::debug!(turn_id = %turn_id, active_turns = turns.len(), "Turn registered");

    let (sink, receiver) = EventSink::channel(orchestrator.config().event_buffer, cancel.clone());

    // Spawn a task to drive the turn; the response only drains its events
    tokio::spawn(async move {
        let watcher = sink.clone();
        let run = orchestrator.run_turn(turn, sink, cancel.clone());
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            _ = watcher.closed() => {
                tracing::info!(turn_id = %turn_id, "Client disconnected, cancelling turn");
                cancel.cancel();
                run.await
            }
        };
        turns.remove(&turn_id);
        // Last sender gone: the event stream ends
        drop(watcher);

        if let Err(e) = result {
            tracing::warn!(turn_id = %turn_id, error = %e, "Turn failed before streaming");
        }
    });

    let stream = ReceiverStream::new(receiver).map(|event| Ok(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &SseEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .json_data(event)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize stream event");
            Event::default()
                .event("error")
                .data(r#"{"type":"error","error":"serialization failed","code":"SYSTEM_INTERNAL_ERROR"}"#)
        })
}
