//! Assembly of a streamed (`stream: true`) chat response into one completion.

use std::collections::BTreeMap;

use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatCompletion, FunctionCall, Message, Role, ToolCall, Usage};

const DONE: &str = "[DONE]";

pub(crate) async fn collect_completion(
    response: reqwest::Response,
) -> Result<ChatCompletion, LlmError> {
    let mut events = std::pin::pin!(response.bytes_stream().eventsource());
    let mut acc = StreamAccumulator::default();
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| LlmError::SseParse(e.to_string()))?;
        let data = event.data.trim();
        if data == DONE {
            break;
        }
        if data.is_empty() {
            continue;
        }
        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| LlmError::SseParse(format!("failed to parse SSE data: {e}")))?;
        acc.apply(chunk);
    }
    acc.finish()
}

#[derive(Debug, Default)]
struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    saw_choice: bool,
    role: Option<Role>,
    content: String,
    calls: BTreeMap<u32, ToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    fn apply(&mut self, chunk: StreamChunk) {
        if self.id.is_none() {
            self.id = chunk.id;
        }
        if self.model.is_none() {
            self.model = chunk.model;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };
        self.saw_choice = true;
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
        let delta = choice.delta;
        if let Some(role) = delta.role {
            self.role = Some(role);
        }
        if let Some(text) = delta.content {
            self.content.push_str(&text);
        }
        for part in delta.tool_calls {
            let position = u32::try_from(self.calls.len()).unwrap_or(u32::MAX);
            let index = part.index.unwrap_or(position);
            let call = self.calls.entry(index).or_insert_with(|| ToolCall {
                id: String::new(),
                kind: "function".into(),
                function: FunctionCall {
                    name: String::new(),
                    arguments: String::new(),
                },
            });
            if let Some(id) = part.id {
                call.id = id;
            }
            if let Some(function) = part.function {
                if let Some(name) = function.name {
                    call.function.name.push_str(&name);
                }
                if let Some(args) = function.arguments {
                    call.function.arguments.push_str(&args);
                }
            }
        }
    }

    fn finish(self) -> Result<ChatCompletion, LlmError> {
        if !self.saw_choice {
            return Err(LlmError::EmptyResponse { provider: "chat" });
        }
        Ok(ChatCompletion {
            id: self.id,
            model: self.model,
            message: Message {
                role: self.role.unwrap_or(Role::Assistant),
                content: self.content,
                tool_calls: self.calls.into_values().collect(),
                tool_call_id: None,
            },
            finish_reason: self.finish_reason,
            usage: self.usage,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    role: Option<Role>,
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: Option<u32>,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
