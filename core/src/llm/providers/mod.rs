//! Model provider implementations

pub mod openai;

pub use openai::OpenAiClient;

use crate::config::{Protocol, ResolvedLlmConfig};
use crate::error::{ConfigError, Result};
use crate::llm::LlmClient;
use std::sync::Arc;

/// Create an LLM client based on the configured protocol
pub fn create_client(config: &ResolvedLlmConfig) -> Result<Arc<dyn LlmClient>> {
    match &config.protocol {
        // Azure OpenAI uses the same wire protocol as OpenAI
        Protocol::OpenAICompat | Protocol::AzureOpenAI => Ok(Arc::new(OpenAiClient::new(config)?)),
        Protocol::Custom(name) => Err(ConfigError::UnsupportedProtocol {
            protocol: name.clone(),
        }
        .into()),
    }
}
