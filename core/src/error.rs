//! Error types and handling for loomchat core

use thiserror::Error;

/// Result type alias for loomchat core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for loomchat core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// LLM client errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool-level errors that escaped result conversion
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Tool registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Execution tracker errors
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Turn driver errors
    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for field '{field}': {value}")]
    InvalidValue { field: String, value: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },
}

/// LLM client errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Malformed stream chunk: {message}")]
    MalformedChunk { message: String },
}

/// Tool-level failures.
///
/// These never end a turn: the orchestrator converts each one into a
/// `ToolCallResult` with `is_error = true` so the model can react to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for {name}: {message}")]
    ArgumentParse { name: String, message: String },

    #[error("Tool execution failed: {name} - {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Tool timed out: {name}")]
    Timeout { name: String },

    #[error("Tool call cancelled: {name}")]
    Cancelled { name: String },
}

impl ToolError {
    /// Shorthand for an execution failure raised by a tool implementation
    pub fn failed<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        ToolError::ExecutionFailed {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Tool registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool already registered: {name}")]
    DuplicateTool { name: String },
}

/// Execution tracker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Tool call already running: {tool_call_id}")]
    AlreadyRunning { tool_call_id: String },
}

/// Errors that end a turn early
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Stream aborted: {reason}")]
    StreamAborted { reason: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Persistence failed: {message}")]
    Persistence { message: String },
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Generic(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Generic(msg.to_string())
    }
}
