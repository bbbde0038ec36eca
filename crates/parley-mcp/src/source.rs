use parley_tools::{BoxFuture, RemoteToolSource, ToolDescriptor, ToolError};
use serde_json::Value;

use crate::error::McpError;
use crate::protocol::call_result_text;
use crate::session::McpSession;

impl RemoteToolSource for McpSession {
    fn source_id(&self) -> &str {
        self.id()
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        McpSession::tools(self)
            .iter()
            .map(crate::tool::McpTool::descriptor)
            .collect()
    }

    fn call<'a>(&'a self, name: &'a str, args: Value) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let rejected = |message: String| ToolError::Remote {
                source_id: self.id().to_owned(),
                tool: name.to_owned(),
                message,
            };
            match self.call_tool(name, args).await {
                Ok(Some(result)) => call_result_text(&result).map_err(rejected),
                Ok(None) => Err(ToolError::NoResult {
                    tool: name.to_owned(),
                }),
                Err(McpError::Rpc { code, message, .. }) => {
                    Err(rejected(format!("error {code}: {message}")))
                }
                Err(e) => Err(rejected(e.to_string())),
            }
        })
    }
}
