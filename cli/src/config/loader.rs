//! Simple CLI configuration loader for loomchat
//!
//! Implements single-source priority loading with flag overrides:
//! 1. --config file/dir (highest priority)
//! 2. Current working directory: ./loomchat.json or ./.loomchat/config.json
//! 3. User config dir: <config_dir>/loomchat/config.json
//! 4. Environment variables only (no files)

use anyhow::{anyhow, Context, Result};
use loomchat_core::{ModelParams, OrchestratorConfig, Protocol, ResolvedLlmConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Raw configuration file format (simple single-file schema)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    /// Protocol to use
    pub protocol: String,
    /// API key (can be "env:VAR_NAME" for environment variable)
    pub api_key: String,
    /// Base URL (optional, uses protocol default if not specified)
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
    /// Model parameters (optional)
    #[serde(default)]
    pub params: ModelParams,
    /// Additional headers (optional)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub server: RawServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer tokens accepted by the API; tokens may use "env:VAR_NAME"
    #[serde(default)]
    pub auth_tokens: Vec<AuthToken>,
}

impl Default for RawServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_tokens: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub user: String,
}

/// Settings for the bundled tools
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsConfig {
    /// Web search is only registered when an endpoint is configured
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebSearchConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Resolved HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Token to user id
    pub tokens: HashMap<String, String>,
}

/// Everything the server needs, fully resolved
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: ResolvedLlmConfig,
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub tools: ToolsConfig,
}

/// CLI configuration loader
pub struct CliConfigLoader {
    /// Override config file/directory path
    config_override: Option<PathBuf>,
    /// Flag overrides
    api_key_override: Option<String>,
    base_url_override: Option<String>,
    model_override: Option<String>,
    bind_override: Option<String>,
}

impl CliConfigLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self {
            config_override: None,
            api_key_override: None,
            base_url_override: None,
            model_override: None,
            bind_override: None,
        }
    }

    /// Set config file/directory override
    pub fn with_config_override(mut self, path: PathBuf) -> Self {
        self.config_override = Some(path);
        self
    }

    /// Set API key override
    pub fn with_api_key_override(mut self, api_key: String) -> Self {
        self.api_key_override = Some(api_key);
        self
    }

    /// Set base URL override
    pub fn with_base_url_override(mut self, base_url: String) -> Self {
        self.base_url_override = Some(base_url);
        self
    }

    /// Set model override
    pub fn with_model_override(mut self, model: String) -> Self {
        self.model_override = Some(model);
        self
    }

    /// Set listen address override
    pub fn with_bind_override(mut self, bind: String) -> Self {
        self.bind_override = Some(bind);
        self
    }

    /// Load and resolve configuration
    pub async fn load(&self) -> Result<AppConfig> {
        // Step 1: Find and load base configuration
        let mut config = self.load_raw().await?;

        // Step 2: Apply flag overrides
        if let Some(api_key) = &self.api_key_override {
            config.api_key = api_key.clone();
        }
        if let Some(base_url) = &self.base_url_override {
            config.base_url = Some(base_url.clone());
        }
        if let Some(model) = &self.model_override {
            config.model = model.clone();
        }
        if let Some(bind) = &self.bind_override {
            config.server.bind = bind.clone();
        }

        // Step 3: Resolve to final config
        self.resolve_config(config)
    }

    /// Tool settings only; missing configuration means defaults
    pub async fn load_tools_config(&self) -> Result<ToolsConfig> {
        if self.config_override.is_some() {
            return Ok(self.load_raw().await?.tools);
        }

        match self.search_files().await? {
            Some(config) => Ok(config.tools),
            None => Ok(ToolsConfig::default()),
        }
    }

    async fn load_raw(&self) -> Result<RawConfig> {
        if let Some(override_path) = &self.config_override {
            let expanded = expand_path(override_path);
            return self.load_from_path(&expanded).await.with_context(|| {
                format!(
                    "Failed to load config from override path: {}",
                    override_path.display()
                )
            });
        }

        match self.search_files().await? {
            Some(config) => Ok(config),
            None => self.try_load_env_only(),
        }
    }

    /// Search config files in priority order
    async fn search_files(&self) -> Result<Option<RawConfig>> {
        // 1. Current working directory
        if let Some(config) = self.try_load_cwd().await? {
            return Ok(Some(config));
        }

        // 2. User config directory
        self.try_load_user_config().await
    }

    /// Try loading from current working directory
    async fn try_load_cwd(&self) -> Result<Option<RawConfig>> {
        let cwd = std::env::current_dir()?;

        // Try ./loomchat.json first
        let loomchat_json = cwd.join("loomchat.json");
        if loomchat_json.exists() {
            return Ok(Some(self.load_file(&loomchat_json).await?));
        }

        // Try ./.loomchat/config.json
        let dir_config = cwd.join(".loomchat").join("config.json");
        if dir_config.exists() {
            return Ok(Some(self.load_file(&dir_config).await?));
        }

        Ok(None)
    }

    /// Try loading from the platform config directory
    async fn try_load_user_config(&self) -> Result<Option<RawConfig>> {
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("loomchat").join("config.json");
            if config_path.exists() {
                return Ok(Some(self.load_file(&config_path).await?));
            }
        }
        Ok(None)
    }

    /// Build a configuration from environment variables only
    fn try_load_env_only(&self) -> Result<RawConfig> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .or_else(|| self.api_key_override.clone())
            .ok_or_else(|| {
                anyhow!("No configuration found. Please create a loomchat.json file or set OPENAI_API_KEY")
            })?;

        let auth_tokens = std::env::var("LOOMCHAT_AUTH_TOKEN")
            .ok()
            .map(|token| {
                vec![AuthToken {
                    token,
                    user: "default".to_string(),
                }]
            })
            .unwrap_or_default();

        Ok(RawConfig {
            protocol: "openai".to_string(),
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL").ok(),
            model: std::env::var("LOOMCHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            params: ModelParams::default(),
            headers: HashMap::new(),
            server: RawServerConfig {
                bind: default_bind(),
                auth_tokens,
            },
            orchestrator: OrchestratorConfig::default(),
            tools: ToolsConfig::default(),
        })
    }

    /// Load configuration from a specific path (file or directory)
    async fn load_from_path(&self, path: &Path) -> Result<RawConfig> {
        if path.is_file() {
            self.load_file(path).await
        } else if path.is_dir() {
            // Try config.json in the directory
            let config_file = path.join("config.json");
            if config_file.exists() {
                self.load_file(&config_file).await
            } else {
                Err(anyhow!(
                    "No config.json found in directory: {}",
                    path.display()
                ))
            }
        } else {
            Err(anyhow!("Config path does not exist: {}", path.display()))
        }
    }

    /// Load a single config file
    async fn load_file(&self, path: &Path) -> Result<RawConfig> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Loaded config file");
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Resolve raw config into validated settings
    fn resolve_config(&self, config: RawConfig) -> Result<AppConfig> {
        // Parse protocol
        let protocol = match config.protocol.as_str() {
            "openai" | "openai_compat" => Protocol::OpenAICompat,
            "azure_openai" => Protocol::AzureOpenAI,
            custom => Protocol::Custom(custom.to_string()),
        };

        let api_key = resolve_secret(&config.api_key)?;

        // Resolve base URL
        let base_url = match config.base_url {
            Some(base_url) => base_url,
            None => protocol
                .default_base_url()
                .ok_or_else(|| {
                    anyhow!("Protocol '{}' requires an explicit base_url", protocol.as_str())
                })?
                .to_string(),
        };

        let llm = ResolvedLlmConfig::new(protocol, base_url, api_key, config.model)
            .with_params(config.params)
            .with_headers(config.headers);
        llm.validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        config
            .orchestrator
            .validate()
            .map_err(|e| anyhow!("Invalid orchestrator settings: {}", e))?;

        let bind: SocketAddr = config
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", config.server.bind))?;

        let mut tokens = HashMap::new();
        for entry in config.server.auth_tokens {
            let token = resolve_secret(&entry.token)?;
            if token.is_empty() {
                return Err(anyhow!("Empty auth token for user '{}'", entry.user));
            }
            tokens.insert(token, entry.user);
        }
        if tokens.is_empty() {
            return Err(anyhow!(
                "No auth tokens configured. Add server.auth_tokens to the config file or set LOOMCHAT_AUTH_TOKEN"
            ));
        }

        if let Some(ref search) = config.tools.web_search {
            if search.endpoint.is_empty() {
                return Err(anyhow!("tools.web_search.endpoint cannot be empty"));
            }
        }

        Ok(AppConfig {
            llm,
            server: ServerConfig { bind, tokens },
            orchestrator: config.orchestrator,
            tools: config.tools,
        })
    }
}

impl Default for CliConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a value that may reference an environment variable as "env:NAME"
pub fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => std::env::var(var_name)
            .with_context(|| format!("Environment variable not found: {}", var_name)),
        None => Ok(value.to_string()),
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
