#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("invalid URL for server '{server_id}': {url}")]
    InvalidUrl { server_id: String, url: String },

    #[error("connection failed for server '{server_id}': {message}")]
    Connection { server_id: String, message: String },

    #[error("server '{server_id}' answered {method} with error {code}: {message}")]
    Rpc {
        server_id: String,
        method: String,
        code: i64,
        message: String,
    },

    #[error("server '{server_id}' not ready after {waited_secs}s")]
    ReadyTimeout { server_id: String, waited_secs: u64 },

    #[error("session for server '{server_id}' is closed")]
    Closed { server_id: String },

    #[error("server id '{server_id}' is configured more than once")]
    DuplicateServer { server_id: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl McpError {
    /// Whether the error is a bounded wait running out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadyTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
