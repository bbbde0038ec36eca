use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PARLEY_CHAT_SERVER") {
            self.chat.server = v;
        }
        if let Ok(v) = std::env::var("PARLEY_CHAT_PATH") {
            self.chat.path = v;
        }
        if let Ok(v) = std::env::var("PARLEY_CHAT_TOKEN") {
            self.chat.token = v;
        }
        if let Ok(v) = std::env::var("PARLEY_CHAT_MODEL") {
            self.chat.model = v;
        }
        if let Ok(v) = std::env::var("PARLEY_CHAT_TEMPERATURE") {
            match v.parse::<f32>() {
                Ok(t) => self.chat.temperature = t,
                Err(_) => tracing::warn!("ignoring invalid PARLEY_CHAT_TEMPERATURE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("PARLEY_CHAT_MAX_TOKENS") {
            match v.parse::<u32>() {
                Ok(n) => self.chat.max_tokens = Some(n),
                Err(_) => tracing::warn!("ignoring invalid PARLEY_CHAT_MAX_TOKENS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("PARLEY_HISTORY_LIMIT") {
            match v.parse::<usize>() {
                Ok(n) => self.chat.history_limit = n,
                Err(_) => tracing::warn!("ignoring invalid PARLEY_HISTORY_LIMIT value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("PARLEY_MAX_TOOL_ROUNDS") {
            match v.parse::<usize>() {
                Ok(n) => self.chat.max_tool_rounds = n,
                Err(_) => tracing::warn!("ignoring invalid PARLEY_MAX_TOOL_ROUNDS value: {v}"),
            }
        }
        for server in &mut self.mcp.servers {
            if let Ok(v) = std::env::var(mcp_token_var(&server.id)) {
                server.token = Some(v);
            }
        }
    }
}

/// `PARLEY_MCP_<ID>_TOKEN`, with the id upper-cased and `-` replaced by `_`.
pub(crate) fn mcp_token_var(server_id: &str) -> String {
    format!(
        "PARLEY_MCP_{}_TOKEN",
        server_id.to_uppercase().replace('-', "_")
    )
}
