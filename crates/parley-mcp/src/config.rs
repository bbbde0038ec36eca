use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::McpError;

pub const DEFAULT_ENDPOINT: &str = "/sse";
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_CLIENT_NAME: &str = "mcp-client";
pub const DEFAULT_CLIENT_VERSION: &str = "0.1.0";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-05-05";

/// What a session does after its event stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Stay disconnected until the next call needs the session.
    #[default]
    OnNextUse,
    /// Reconnect after `delay`, repeating until the session is shut down.
    Immediate { delay: Duration },
}

/// Connection settings for one MCP server.
#[derive(Clone)]
pub struct ServerEntry {
    pub id: String,
    /// Base URL, e.g. `http://localhost:8080`.
    pub server: String,
    /// Path of the event stream relative to `server`.
    pub endpoint: String,
    pub token: Option<String>,
    /// How long a `tools/call` waits for its response.
    pub heartbeat: Duration,
    pub reconnect: ReconnectPolicy,
    /// Pause between reconnect attempts made on behalf of a waiting call.
    pub retry_delay: Duration,
    /// Upper bound on waiting for the session to become ready; `None` waits
    /// indefinitely.
    pub ready_timeout: Option<Duration>,
    pub client_name: String,
    pub client_version: String,
    pub protocol_version: String,
}

impl fmt::Debug for ServerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEntry")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("heartbeat", &self.heartbeat)
            .field("reconnect", &self.reconnect)
            .field("retry_delay", &self.retry_delay)
            .field("ready_timeout", &self.ready_timeout)
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .field("protocol_version", &self.protocol_version)
            .finish()
    }
}

impl ServerEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server: server.into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            token: None,
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect: ReconnectPolicy::default(),
            retry_delay: DEFAULT_RECONNECT_DELAY,
            ready_timeout: None,
            client_name: DEFAULT_CLIENT_NAME.into(),
            client_version: DEFAULT_CLIENT_VERSION.into(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.into(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    pub(crate) fn base_url(&self) -> Result<Url, McpError> {
        let url = Url::parse(&self.server).map_err(|_| self.invalid_url(&self.server))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(self.invalid_url(&self.server));
        }
        Ok(url)
    }

    /// URL of the event stream: `server` followed by `endpoint`.
    pub(crate) fn stream_url(&self) -> Result<Url, McpError> {
        self.resolve(&self.endpoint)
    }

    /// Resolve a path or absolute URL advertised by the server.
    ///
    /// Paths are appended to `server`, keeping any path prefix it carries.
    pub(crate) fn resolve(&self, reference: &str) -> Result<Url, McpError> {
        let base = self.base_url()?;
        let reference = reference.trim();
        if let Ok(absolute) = Url::parse(reference) {
            return Ok(absolute);
        }
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            reference.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|_| self.invalid_url(reference))
    }

    pub(crate) fn bearer(&self) -> Option<String> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| format!("Bearer {t}"))
    }

    fn invalid_url(&self, url: &str) -> McpError {
        McpError::InvalidUrl {
            server_id: self.id.clone(),
            url: url.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let entry = ServerEntry::new("docs", "http://localhost:8080");
        assert_eq!(entry.endpoint, "/sse");
        assert_eq!(entry.heartbeat, Duration::from_secs(30));
        assert_eq!(entry.reconnect, ReconnectPolicy::OnNextUse);
        assert_eq!(entry.client_name, "mcp-client");
        assert_eq!(entry.protocol_version, "2025-05-05");
        assert!(entry.ready_timeout.is_none());
    }

    #[test]
    fn stream_url_joins_endpoint() {
        let entry = ServerEntry::new("docs", "http://localhost:8080/");
        assert_eq!(
            entry.stream_url().unwrap().as_str(),
            "http://localhost:8080/sse"
        );
    }

    #[test]
    fn advertised_endpoint_may_be_relative_or_absolute() {
        let entry = ServerEntry::new("docs", "http://localhost:8080");
        assert_eq!(
            entry.resolve("/messages?session_id=abc").unwrap().as_str(),
            "http://localhost:8080/messages?session_id=abc"
        );
        assert_eq!(
            entry.resolve("http://other:9/rpc").unwrap().as_str(),
            "http://other:9/rpc"
        );
    }

    #[test]
    fn server_path_prefix_is_kept() {
        let entry = ServerEntry::new("docs", "http://localhost:8080/mcp").with_endpoint("sse");
        assert_eq!(
            entry.stream_url().unwrap().as_str(),
            "http://localhost:8080/mcp/sse"
        );
        assert_eq!(
            entry.resolve("/messages/").unwrap().as_str(),
            "http://localhost:8080/mcp/messages/"
        );
    }

    #[test]
    fn non_http_server_is_rejected() {
        let entry = ServerEntry::new("docs", "ftp://localhost");
        assert!(matches!(
            entry.stream_url(),
            Err(McpError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn bearer_skips_empty_token() {
        let entry = ServerEntry::new("docs", "http://h");
        assert_eq!(entry.bearer(), None);
        assert_eq!(entry.clone().with_token("").bearer(), None);
        assert_eq!(
            entry.with_token("abc").bearer().as_deref(),
            Some("Bearer abc")
        );
    }

    #[test]
    fn debug_redacts_token() {
        let entry = ServerEntry::new("docs", "http://h").with_token("secret-token");
        let debug = format!("{entry:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
