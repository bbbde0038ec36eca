//! Conversation history for chat exchanges.

pub mod store;

pub use store::{DEFAULT_HISTORY_LIMIT, MessageStore, Snapshot};
