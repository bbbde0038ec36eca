//! Chat orchestration for parley: configuration loading and validation, the
//! tool-augmented exchange loop, and the error taxonomy callers match on.

pub mod config;
pub mod error;
pub mod orchestrator;

pub use config::Config;
pub use error::{ChatError, ConfigError, ErrorKind};
pub use orchestrator::{ChatOrchestrator, ExchangeOptions, ExchangeResult, RequestDefaults};
