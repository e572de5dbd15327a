//! Tool registry assembled at server startup

use crate::config::ToolsConfig;
use crate::tools::{CurrentTimeTool, WebSearchTool};
use anyhow::Result;
use loomchat_core::tools::ToolRegistry;
use std::sync::Arc;

/// Create the registry of every tool enabled by the configuration
pub fn create_tool_registry(config: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    if let Some(search) = &config.web_search {
        registry.register(Arc::new(WebSearchTool::new(search)))?;
    } else {
        tracing::info!("web_search not configured, tool disabled");
    }
    registry.register(Arc::new(CurrentTimeTool::new()))?;

    Ok(registry)
}
