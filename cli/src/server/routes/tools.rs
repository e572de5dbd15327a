//! Tool listing endpoint

use crate::server::state::AppState;
use axum::extract::State;
use axum::Json;
use loomchat_core::llm::ToolDefinition;

/// Schemas of every registered tool, in registration order
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDefinition>> {
    Json(state.orchestrator().registry().list_schemas())
}
