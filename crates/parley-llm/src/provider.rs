use std::future::Future;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One entry of the conversation as sent to and received from the chat endpoint.
///
/// A `null` content on the wire is read as an empty string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    #[must_use]
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Result of a tool invocation, answering the call with `call_id`.
    #[must_use]
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Tool messages and assistant messages that requested tools.
    #[must_use]
    pub fn is_tool_artifact(&self) -> bool {
        self.role == Role::Tool || (self.role == Role::Assistant && self.has_tool_calls())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Target function and its JSON-encoded arguments.
///
/// Some endpoints send `arguments` as an object instead of a string; both are
/// accepted and stored as JSON text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, deserialize_with = "arguments_as_text")]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".into()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn arguments_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Tool schema attached to a chat request.
///
/// Serialized in the wire shape
/// `{"type":"function","function":{"name","description","parameters"}}`.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl Serialize for ToolDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ToolDefinition", 2)?;
        s.serialize_field("type", "function")?;
        s.serialize_field(
            "function",
            &WireFunction {
                name: &self.name,
                description: &self.description,
                parameters: &self.parameters,
            },
        )?;
        s.end()
    }
}

/// Optional sampling and limit parameters, passed through verbatim when set.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(flatten)]
    pub params: GenerationParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// First choice of a chat response together with response metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatCompletion {
    pub id: Option<String>,
    pub model: Option<String>,
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    #[must_use]
    pub fn from_message(message: Message) -> Self {
        Self {
            id: None,
            model: None,
            message,
            finish_reason: None,
            usage: None,
        }
    }
}

pub trait ChatProvider: Send + Sync {
    /// Send one chat request and return the first choice.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be reached, answers with a
    /// non-success status, or the body lacks a usable choice.
    fn complete(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<ChatCompletion, LlmError>> + Send;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_content_reads_as_empty() {
        let msg: Message =
            serde_json::from_value(json!({"role": "assistant", "content": null})).unwrap();
        assert_eq!(msg.content, "");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn assistant_tool_calls_parse_from_wire() {
        let msg: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "search", "arguments": "{\"q\":\"x\"}"}
            }]
        }))
        .unwrap();
        assert!(msg.is_tool_artifact());
        assert_eq!(msg.tool_calls[0].function.name, "search");
        assert_eq!(msg.tool_calls[0].function.arguments, "{\"q\":\"x\"}");
    }

    #[test]
    fn object_arguments_become_json_text() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "1",
            "function": {"name": "add", "arguments": {"a": 1}}
        }))
        .unwrap();
        assert_eq!(call.kind, "function");
        assert_eq!(call.function.arguments, r#"{"a":1}"#);
    }

    #[test]
    fn tool_message_serializes_call_id() {
        let value = serde_json::to_value(Message::tool("7", "ok")).unwrap();
        assert_eq!(value, json!({"role": "tool", "content": "ok", "tool_call_id": "7"}));
    }

    #[test]
    fn plain_message_omits_tool_fields() {
        let value = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn request_omits_absent_params_and_empty_tools() {
        let request = ChatRequest {
            model: "m".into(),
            params: GenerationParams {
                temperature: Some(0.5),
                ..GenerationParams::default()
            },
            stop: None,
            stream: false,
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "m",
                "temperature": 0.5,
                "stream": false,
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn tool_definition_wire_shape() {
        let def = ToolDefinition {
            name: "search".into(),
            description: "web search".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        };
        assert_eq!(
            serde_json::to_value(&def).unwrap(),
            json!({
                "type": "function",
                "function": {
                    "name": "search",
                    "description": "web search",
                    "parameters": {"type": "object", "properties": {}, "required": []}
                }
            })
        );
    }
}
