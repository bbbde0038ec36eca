use std::collections::HashSet;
use std::sync::Arc;

use parley_tools::{ToolRegistry, ToolSource};
use tokio::task::JoinSet;

use crate::config::ServerEntry;
use crate::error::McpError;
use crate::session::McpSession;
use crate::tool::McpTool;

/// Owns one [`McpSession`] per configured server.
pub struct McpManager {
    sessions: Vec<McpSession>,
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("server_count", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl McpManager {
    /// # Errors
    ///
    /// Returns `McpError::DuplicateServer` when two entries share an id and
    /// `McpError::InvalidUrl` for an unusable server URL.
    pub fn new(entries: Vec<ServerEntry>) -> Result<Self, McpError> {
        let mut seen = HashSet::new();
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id.clone()) {
                return Err(McpError::DuplicateServer { server_id: entry.id });
            }
            sessions.push(McpSession::new(entry)?);
        }
        Ok(Self { sessions })
    }

    /// Connect to all servers concurrently and return the tools of those that
    /// became ready. Failed servers are logged and stay disconnected; their
    /// sessions reconnect on first use.
    pub async fn connect_all(&self) -> Vec<McpTool> {
        let mut join_set = JoinSet::new();
        for session in self.sessions.iter().cloned() {
            join_set.spawn(async move {
                let result = session.connect_and_wait().await;
                (session, result)
            });
        }

        let mut all_tools = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((session, result)) = joined else {
                tracing::warn!("MCP connection task panicked");
                continue;
            };
            match result {
                Ok(()) => {
                    let tools = session.tools();
                    tracing::info!(
                        server_id = session.id(),
                        tools = tools.len(),
                        "connected to MCP server"
                    );
                    all_tools.extend(tools);
                }
                Err(e) => {
                    tracing::warn!(server_id = session.id(), "MCP server connection failed: {e:#}");
                }
            }
        }
        all_tools
    }

    #[must_use]
    pub fn sessions(&self) -> &[McpSession] {
        &self.sessions
    }

    #[must_use]
    pub fn session(&self, server_id: &str) -> Option<&McpSession> {
        self.sessions.iter().find(|s| s.id() == server_id)
    }

    /// Offer every session's tools through `registry`.
    pub fn register_all(&self, registry: &ToolRegistry) {
        for session in &self.sessions {
            registry.register(ToolSource::Remote(Arc::new(session.clone())));
        }
    }

    pub fn shutdown_all(&self) {
        for session in &self.sessions {
            session.shutdown();
        }
    }
}
