//! Conversation history endpoint

use crate::server::auth::AuthenticatedUser;
use crate::server::error::{ApiResult, AppError};
use crate::server::state::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use loomchat_core::Message;

/// Stored messages of one of the caller's conversations, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .orchestrator()
        .repository()
        .list_by_conversation(&conversation_id)
        .await
        .map_err(|e| AppError::internal_error(e.to_string()))?;

    if messages.is_empty() || messages.iter().any(|m| m.user_id != user.user_id) {
        return Err(AppError::not_found("Conversation"));
    }

    Ok(Json(messages))
}
