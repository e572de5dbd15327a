//! Tools listing command

use crate::config::CliConfigLoader;
use crate::tools::create_tool_registry;
use anyhow::Result;
use tracing::info;

/// Show the tools the server would advertise
pub async fn tools_command(loader: CliConfigLoader) -> Result<()> {
    info!("Listing available tools");

    let tools_config = loader.load_tools_config().await?;
    let registry = create_tool_registry(&tools_config)?;

    println!("Available tools\n");

    for name in registry.list_tools() {
        if let Some((tool_name, description)) = registry.get_tool_info(name) {
            println!("{}", tool_name);
            // First line of the description only
            let first_line = description.lines().next().unwrap_or(description);
            println!("   {}\n", first_line);
        }
    }

    if tools_config.web_search.is_none() {
        println!("web_search is disabled; set tools.web_search.endpoint to enable it");
    }

    Ok(())
}
