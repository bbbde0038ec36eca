//! MCP client over the legacy SSE transport.
//!
//! A [`McpSession`] owns one long-lived event stream per server, performs the
//! `initialize` / `tools/list` handshake, and correlates `tools/call`
//! responses by request id. Sessions plug into a
//! [`parley_tools::ToolRegistry`] as remote tool sources.

pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod source;
pub mod tool;

pub use config::{ReconnectPolicy, ServerEntry};
pub use error::McpError;
pub use manager::McpManager;
pub use session::{McpSession, SessionState};
pub use tool::McpTool;
