//! Tool descriptors, argument coercion, and the registry that dispatches
//! model-requested tool calls to local handlers or remote sources.

use std::future::Future;
use std::pin::Pin;

pub mod args;
pub mod descriptor;
pub mod error;
pub mod local;
pub mod registry;
pub mod remote;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use args::ToolArgs;
pub use descriptor::{ParamSpec, ParamType, ToolDescriptor};
pub use error::ToolError;
pub use local::LocalTool;
pub use registry::{ToolRegistry, ToolResult, ToolSource};
pub use remote::RemoteToolSource;
