//! Run the chat server

use crate::config::CliConfigLoader;
use crate::server::{self, AppState};
use crate::tools::create_tool_registry;
use anyhow::{Context, Result};
use loomchat_core::llm::{create_client, ChatOptions};
use loomchat_core::{InMemoryMessageRepository, Orchestrator, ToolExecutionTracker};
use std::sync::Arc;
use tracing::info;

/// Load configuration, wire the orchestrator and serve until ctrl-c
pub async fn serve_command(loader: CliConfigLoader) -> Result<()> {
    let config = loader.load().await?;

    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    let registry = create_tool_registry(&config.tools)?.freeze();

    info!(
        provider = %client.provider_name(),
        model = %client.model_name(),
        tools = ?registry.list_tools(),
        "Starting loomchat server"
    );

    let orchestrator = Orchestrator::new(
        client,
        registry,
        Arc::new(ToolExecutionTracker::new()),
        Arc::new(InMemoryMessageRepository::new()),
        config.orchestrator,
    )
    .with_options(ChatOptions::from(&config.llm.params));

    let state = AppState::new(Arc::new(orchestrator), config.server.tokens);
    server::serve(state, config.server.bind).await?;

    Ok(())
}
