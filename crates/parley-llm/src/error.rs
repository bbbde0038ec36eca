#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chat endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("response choice carries no message")]
    MissingMessage,

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

impl LlmError {
    /// Whether the failure happened before a well-formed response was received.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Status { .. } | Self::RateLimited | Self::InvalidUrl(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
