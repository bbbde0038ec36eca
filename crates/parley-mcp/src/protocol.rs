//! JSON-RPC 2.0 envelopes and the MCP payloads this client exchanges.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ServerEntry;

pub const JSONRPC_VERSION: &str = "2.0";

/// Id reserved for the `initialize` request of every connection.
pub const INITIALIZE_ID: u64 = 0;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_TOOLS_CHANGED: &str = "notifications/tools/list_changed";
pub const METHOD_PING: &str = "ping";

const METHOD_NOT_FOUND: i64 = -32601;

/// Outbound request, or notification when `id` is `None`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> RpcRequest<'a> {
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params: Some(params),
        }
    }

    #[must_use]
    pub fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params: None,
        }
    }
}

/// Outbound reply to a request the server sent us.
#[derive(Debug, Clone, Serialize)]
pub struct RpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcReply {
    #[must_use]
    pub fn to(request_id: Value, method: &str) -> Self {
        if method == METHOD_PING {
            Self {
                jsonrpc: JSONRPC_VERSION,
                id: request_id,
                result: Some(json!({})),
                error: None,
            }
        } else {
            Self {
                jsonrpc: JSONRPC_VERSION,
                id: request_id,
                result: None,
                error: Some(RpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("method not supported: {method}"),
                    data: None,
                }),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any inbound envelope carried by a `message` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// What an inbound envelope is, from the client's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// Request from the server that expects a reply.
    Request { id: Value, method: String },
    Notification { method: String },
    /// Well-formed JSON that fits none of the above.
    Unrecognized,
}

impl RpcMessage {
    #[must_use]
    pub fn classify(self) -> Inbound {
        match (self.id, self.method) {
            (Some(id), Some(method)) if !id.is_null() => Inbound::Request { id, method },
            (None | Some(Value::Null), Some(method)) => Inbound::Notification { method },
            (Some(id), None) => {
                let Some(id) = parse_id(&id) else {
                    return Inbound::Unrecognized;
                };
                let outcome = match self.error {
                    Some(err) => Err(err),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Inbound::Response { id, outcome }
            }
            _ => Inbound::Unrecognized,
        }
    }
}

/// Ids come back as numbers, though some servers echo them as strings.
fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[must_use]
pub fn initialize_params(entry: &ServerEntry) -> Value {
    json!({
        "protocolVersion": entry.protocol_version,
        "capabilities": {},
        "clientInfo": {
            "name": entry.client_name,
            "version": entry.client_version,
        },
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[must_use]
pub fn list_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => json!({}),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ListedTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[must_use]
pub fn call_params(name: &str, arguments: Value) -> Value {
    json!({ "name": name, "arguments": arguments })
}

/// Text carried by a `tools/call` result.
///
/// The `text` of every `type: "text"` content item, joined by newlines. A
/// result without a `content` array is returned as raw JSON.
///
/// # Errors
///
/// Returns the text as the error when the result is flagged `isError`.
pub fn call_result_text(result: &Value) -> Result<String, String> {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return Ok(result.to_string());
    };
    let text = content
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        Err(text)
    } else {
        Ok(text)
    }
}
