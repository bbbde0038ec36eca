mod env;
mod types;


pub use types::*;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use parley_llm::{GenerationParams, HttpChatClient};
use parley_mcp::ServerEntry;
use url::Url;

use crate::error::ConfigError;

const PLACEHOLDER_MARKERS: [&str; 4] = ["XXXX", "YOUR", "REPLACE", "PLACEHOLDER"];
const MIN_TOKEN_LEN: usize = 10;
const MAX_SEED: u32 = (1 << 31) - 1;
const LARGE_HISTORY_LIMIT: usize = 100;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Check everything that would otherwise fail on first use.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chat = &self.chat;
        validate_server_url("chat.server", &chat.server)?;
        validate_token("chat.token", &chat.token)?;
        if chat.model.trim().is_empty() {
            return Err(ConfigError::invalid("chat.model", "must not be empty"));
        }
        if chat.path.trim().is_empty() {
            return Err(ConfigError::invalid("chat.path", "must not be empty"));
        }
        if chat.history_limit == 0 {
            return Err(ConfigError::invalid("chat.history_limit", "must be greater than 0"));
        }
        if chat.max_tool_rounds == 0 {
            return Err(ConfigError::invalid("chat.max_tool_rounds", "must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&chat.temperature) {
            return Err(ConfigError::invalid(
                "chat.temperature",
                format!("{} is outside 0.0..=2.0", chat.temperature),
            ));
        }
        for (field, value) in [
            ("chat.top_k", chat.top_k),
            ("chat.max_tokens", chat.max_tokens),
            ("chat.max_input_tokens", chat.max_input_tokens),
        ] {
            if value == Some(0) {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }
        if let Some(seed) = chat.seed
            && seed > MAX_SEED
        {
            return Err(ConfigError::invalid(
                "chat.seed",
                format!("{seed} exceeds {MAX_SEED}"),
            ));
        }

        let mut ids = HashSet::new();
        for server in &self.mcp.servers {
            let field = |name: &str| format!("mcp.servers.{}.{name}", server.id);
            if server.id.trim().is_empty() {
                return Err(ConfigError::invalid("mcp.servers.id", "must not be empty"));
            }
            if !ids.insert(server.id.as_str()) {
                return Err(ConfigError::invalid(field("id"), "is used more than once"));
            }
            validate_server_url(&field("server"), &server.server)?;
            if server.endpoint.trim().is_empty() {
                return Err(ConfigError::invalid(field("endpoint"), "must not be empty"));
            }
            if server.heartbeat_secs == 0 {
                return Err(ConfigError::invalid(
                    field("heartbeat_secs"),
                    "must be greater than 0",
                ));
            }
            if let Some(token) = &server.token {
                validate_token(&field("token"), token)?;
            }
        }
        Ok(())
    }

    /// Advisory notes about settings that are valid but likely unintended.
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.chat.history_limit > LARGE_HISTORY_LIMIT {
            notes.push(format!(
                "chat.history_limit is {}; long histories raise token usage and latency",
                self.chat.history_limit
            ));
        }
        if self.chat.max_tokens.is_none() {
            notes.push("chat.max_tokens is not set; responses are bounded only by the model".into());
        }
        notes
    }

    /// Full chat endpoint URL with duplicate slashes collapsed.
    #[must_use]
    pub fn chat_url(&self) -> String {
        parley_llm::http::join_url(&self.chat.server, &self.chat.path)
    }

    #[must_use]
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: Some(self.chat.temperature),
            top_k: self.chat.top_k,
            seed: self.chat.seed,
            max_tokens: self.chat.max_tokens,
            max_input_tokens: self.chat.max_input_tokens,
            enable_thinking: self.chat.enable_thinking,
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the chat server URL is unusable or
    /// the HTTP client cannot be built.
    pub fn chat_client(&self) -> Result<HttpChatClient, ConfigError> {
        let client = HttpChatClient::new(&self.chat.server, &self.chat.path, &self.chat.token)
            .and_then(|c| c.with_timeout(Duration::from_secs(self.chat.timeout_secs)))
            .map_err(|e| ConfigError::invalid("chat.server", e.to_string()))?;
        Ok(client.with_max_retries(self.chat.max_retries))
    }

    #[must_use]
    pub fn mcp_entries(&self) -> Vec<ServerEntry> {
        self.mcp.servers.iter().map(McpServerConfig::to_entry).collect()
    }
}

fn validate_server_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(field, format!("{value}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(field, "must use http or https"));
    }
    Ok(())
}

fn validate_token(field: &str, token: &str) -> Result<(), ConfigError> {
    if token.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    if token.len() < MIN_TOKEN_LEN {
        return Err(ConfigError::invalid(field, "is too short to be a real token"));
    }
    let upper = token.to_uppercase();
    if PLACEHOLDER_MARKERS.iter().any(|m| upper.contains(m)) {
        return Err(ConfigError::invalid(field, "looks like a placeholder"));
    }
    Ok(())
}
