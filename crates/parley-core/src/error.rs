use std::path::PathBuf;

use parley_llm::LlmError;
use parley_mcp::McpError;
use parley_tools::ToolError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a [`ChatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfiguration,
    TransportFailure,
    ResponseParseError,
    ToolInvocation,
    ProtocolTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("transport failure: {0}")]
    TransportFailure(#[source] BoxError),

    #[error("malformed response: {0}")]
    ResponseParseError(#[source] BoxError),

    #[error("tool invocation failed: {0}")]
    ToolInvocation(#[from] ToolError),

    #[error("protocol timeout: {0}")]
    ProtocolTimeout(String),
}

impl ChatError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::TransportFailure(_) => ErrorKind::TransportFailure,
            Self::ResponseParseError(_) => ErrorKind::ResponseParseError,
            Self::ToolInvocation(_) => ErrorKind::ToolInvocation,
            Self::ProtocolTimeout(_) => ErrorKind::ProtocolTimeout,
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::InvalidUrl(url) => Self::InvalidConfiguration(format!("chat URL {url}")),
            e if e.is_transport() => Self::TransportFailure(Box::new(e)),
            e => Self::ResponseParseError(Box::new(e)),
        }
    }
}

impl From<McpError> for ChatError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::ReadyTimeout { .. } => Self::ProtocolTimeout(err.to_string()),
            McpError::InvalidUrl { .. } | McpError::DuplicateServer { .. } => {
                Self::InvalidConfiguration(err.to_string())
            }
            e => Self::TransportFailure(Box::new(e)),
        }
    }
}

impl From<ConfigError> for ChatError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
