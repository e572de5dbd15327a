//! Cancellation endpoints

use crate::server::auth::AuthenticatedUser;
use crate::server::error::{ApiResult, AppError};
use crate::server::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelResponse {
    pub success: bool,
}

/// Cancel one running tool call by its id.
///
/// Call ids are looked up only within the caller's own live turns.
/// `success` is false when the call is unknown to the caller, already
/// finished, or already cancelled.
pub async fn cancel_tool_call(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<CancelResponse>> {
    let Json(body) = payload.map_err(|e| AppError::invalid_input(e.body_text()))?;

    let tool_call_id = match body.get("toolCallId") {
        None | Some(Value::Null) => return Err(AppError::missing_field("toolCallId")),
        Some(Value::String(id)) => id.as_str(),
        Some(_) => return Err(AppError::invalid_input("toolCallId must be a string")),
    };

    let orchestrator = state.orchestrator();
    let success = state
        .turns()
        .owned_by(&user.user_id)
        .iter()
        .any(|turn_id| orchestrator.tracker().cancel(turn_id, tool_call_id));
    tracing::info!(
        user_id = %user.user_id,
        tool_call_id = %tool_call_id,
        success,
        "Tool call cancel requested"
    );

    Ok(Json(CancelResponse { success }))
}

/// Cancel a whole turn: the provider stream and every tool call in it
pub async fn cancel_turn(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(turn_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let success = state.turns().cancel(&turn_id, &user.user_id);
    tracing::info!(user_id = %user.user_id, turn_id = %turn_id, success, "Turn cancel requested");
    Ok(Json(CancelResponse { success }))
}
