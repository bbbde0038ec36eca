#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid tool arguments: {message}")]
    InvalidArguments { message: String },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("no result from {tool} before timeout")]
    NoResult { tool: String },

    #[error("{source_id} rejected {tool}: {message}")]
    Remote {
        source_id: String,
        tool: String,
        message: String,
    },

    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
