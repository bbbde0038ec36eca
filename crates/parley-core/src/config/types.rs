use std::fmt;
use std::time::Duration;

use parley_mcp::config::{
    DEFAULT_CLIENT_NAME, DEFAULT_CLIENT_VERSION, DEFAULT_ENDPOINT, DEFAULT_HEARTBEAT,
    DEFAULT_PROTOCOL_VERSION, DEFAULT_RECONNECT_DELAY,
};
use parley_mcp::{ReconnectPolicy, ServerEntry};
use serde::Deserialize;

pub const DEFAULT_CHAT_PATH: &str = "/v1/chat/completions";

fn default_path() -> String {
    DEFAULT_CHAT_PATH.into()
}

fn default_history_limit() -> usize {
    parley_memory::DEFAULT_HISTORY_LIMIT
}

fn default_max_tool_rounds() -> usize {
    10
}

fn default_temperature() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

/// Chat endpoint, model, generation defaults, and conversation limits.
#[derive(Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub model: String,
    /// Maximum number of non-system messages kept in the conversation window.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub seed: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    #[serde(default)]
    pub enable_thinking: Option<bool>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            path: default_path(),
            token: String::new(),
            model: String::new(),
            history_limit: default_history_limit(),
            max_tool_rounds: default_max_tool_rounds(),
            temperature: default_temperature(),
            top_k: None,
            seed: None,
            max_tokens: None,
            max_input_tokens: None,
            enable_thinking: None,
            stream: false,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("server", &self.server)
            .field("path", &self.path)
            .field("token", &redacted(&self.token))
            .field("model", &self.model)
            .field("history_limit", &self.history_limit)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("temperature", &self.temperature)
            .field("top_k", &self.top_k)
            .field("seed", &self.seed)
            .field("max_tokens", &self.max_tokens)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("enable_thinking", &self.enable_thinking)
            .field("stream", &self.stream)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn redacted(token: &str) -> &'static str {
    if token.is_empty() { "" } else { "[REDACTED]" }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    #[default]
    OnNextUse,
    Immediate,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}

fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT.as_secs()
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.into()
}

fn default_client_version() -> String {
    DEFAULT_CLIENT_VERSION.into()
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.into()
}

/// One `[[mcp.servers]]` entry.
#[derive(Clone, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub server: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectMode,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
}

impl fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServerConfig")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_deref().map(redacted))
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("reconnect", &self.reconnect)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("ready_timeout_secs", &self.ready_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl McpServerConfig {
    #[must_use]
    pub fn to_entry(&self) -> ServerEntry {
        let delay = Duration::from_secs(self.reconnect_delay_secs);
        let reconnect = match self.reconnect {
            ReconnectMode::OnNextUse => ReconnectPolicy::OnNextUse,
            ReconnectMode::Immediate => ReconnectPolicy::Immediate { delay },
        };
        let mut entry = ServerEntry::new(&self.id, &self.server)
            .with_endpoint(&self.endpoint)
            .with_heartbeat(Duration::from_secs(self.heartbeat_secs))
            .with_reconnect(reconnect)
            .with_retry_delay(delay);
        if let Some(token) = &self.token {
            entry = entry.with_token(token);
        }
        if let Some(secs) = self.ready_timeout_secs {
            entry = entry.with_ready_timeout(Duration::from_secs(secs));
        }
        entry.client_name.clone_from(&self.client_name);
        entry.client_version.clone_from(&self.client_version);
        entry.protocol_version.clone_from(&self.protocol_version);
        entry
    }
}
