use serde_json::Value;

use crate::BoxFuture;
use crate::descriptor::ToolDescriptor;
use crate::error::ToolError;

/// A set of tools hosted elsewhere, such as by a remote tool server.
///
/// `tools` reports the tools currently known; the list may change over the
/// source's lifetime and is consulted on every dispatch.
pub trait RemoteToolSource: Send + Sync {
    fn source_id(&self) -> &str;

    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke `name` with a JSON object of arguments and return its text output.
    fn call<'a>(&'a self, name: &'a str, args: Value) -> BoxFuture<'a, Result<String, ToolError>>;
}
