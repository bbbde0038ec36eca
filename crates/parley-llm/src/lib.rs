//! Chat-completion types and the HTTP client for tool-calling chat endpoints.

pub mod chat;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;
pub(crate) mod retry;
pub(crate) mod sse;

pub use chat::HttpChatClient;
pub use error::LlmError;
pub use provider::{
    ChatCompletion, ChatProvider, ChatRequest, FunctionCall, GenerationParams, Message, Role,
    ToolCall, ToolDefinition, Usage,
};
