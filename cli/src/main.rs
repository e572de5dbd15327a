//! # loomchat
//!
//! Chat server that streams model output over server-sent events and runs
//! model-requested tools with per-call cancellation.
//!
//! ## Usage
//!
//! - `loomchat` or `loomchat serve` - Start the HTTP server
//! - `loomchat tools` - Show available tools

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod server;
mod tools;

use commands::{serve_command, tools_command};
use config::CliConfigLoader;

/// loomchat - streaming chat with cancellable tool calls
#[derive(Parser)]
#[command(name = "loomchat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streaming chat server with cancellable tool calls")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file or directory path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key override
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL override
    #[arg(long)]
    base_url: Option<String>,

    /// Model name override
    #[arg(long)]
    model: Option<String>,

    /// Listen address override, e.g. 0.0.0.0:8080
    #[arg(long, env = "LOOMCHAT_BIND")]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Show available tools
    Tools,
}

/// Build a configuration loader from CLI arguments
fn build_config_loader(cli: &Cli) -> CliConfigLoader {
    let mut loader = CliConfigLoader::new();

    if let Some(config_path) = &cli.config {
        loader = loader.with_config_override(config_path.clone());
    }

    if let Some(api_key) = &cli.api_key {
        loader = loader.with_api_key_override(api_key.clone());
    }

    if let Some(base_url) = &cli.base_url {
        loader = loader.with_base_url_override(base_url.clone());
    }

    if let Some(model) = &cli.model {
        loader = loader.with_model_override(model.clone());
    }

    if let Some(bind) = &cli.bind {
        loader = loader.with_bind_override(bind.clone());
    }

    loader
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_loader = build_config_loader(&cli);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve_command(config_loader).await,
        Commands::Tools => tools_command(config_loader).await,
    }
}
