use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::LlmError;
use crate::http::{build_client, join_url};
use crate::provider::{ChatCompletion, ChatProvider, ChatRequest, Message, Usage};
use crate::retry::send_with_retry;
use crate::sse::collect_completion;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Client for an OpenAI-style `chat/completions` endpoint.
#[derive(Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
    url: String,
    token: String,
    max_retries: u32,
}

impl fmt::Debug for HttpChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChatClient")
            .field("client", &"<reqwest::Client>")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpChatClient {
    /// Create a client posting to `server` + `path`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidUrl` if `server` is not an http(s) URL, or
    /// `LlmError::Http` if the HTTP client cannot be built.
    pub fn new(server: &str, path: &str, token: impl Into<String>) -> Result<Self, LlmError> {
        if !(server.starts_with("http://") || server.starts_with("https://")) {
            return Err(LlmError::InvalidUrl(server.to_owned()));
        }
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            url: join_url(server, path),
            token: token.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// # Errors
    ///
    /// Returns `LlmError::Http` if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LlmError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, LlmError> {
        let accept = if request.stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        send_with_retry(&self.url, self.max_retries, || {
            self.client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", accept)
                .json(request)
                .send()
        })
        .await
    }
}

impl ChatProvider for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let response = self.send(request).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, "chat endpoint error");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion = if request.stream {
            collect_completion(response).await?
        } else {
            let text = response.text().await?;
            parse_completion(&text)?
        };

        if let Some(usage) = completion.usage {
            tracing::info!(
                model = completion.model.as_deref().unwrap_or(&request.model),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "chat usage"
            );
        }
        Ok(completion)
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "http"
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<Message>,
    finish_reason: Option<String>,
}

/// Parse a non-streamed response body into its first choice.
///
/// # Errors
///
/// Returns `LlmError::Json` for malformed JSON, `LlmError::EmptyResponse` when
/// `choices` is empty, and `LlmError::MissingMessage` when the first choice has
/// no message.
pub fn parse_completion(body: &str) -> Result<ChatCompletion, LlmError> {
    let parsed: CompletionBody = serde_json::from_str(body)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse { provider: "chat" })?;
    let message = choice.message.ok_or(LlmError::MissingMessage)?;
    Ok(ChatCompletion {
        id: parsed.id,
        model: parsed.model,
        message,
        finish_reason: choice.finish_reason,
        usage: parsed.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    #[test]
    fn parse_plain_answer() {
        let done = parse_completion(
            r#"{"id":"x","model":"m","choices":[{"message":{"role":"assistant","content":"hi"},"finish_reason":"stop"}],"usage":{"completion_tokens":1,"prompt_tokens":2,"total_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(done.message.role, Role::Assistant);
        assert_eq!(done.message.content, "hi");
        assert_eq!(
            done.usage,
            Some(Usage {
                completion_tokens: 1,
                prompt_tokens: 2,
                total_tokens: 3
            })
        );
    }

    #[test]
    fn parse_empty_choices_fails() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { .. }));
    }

    #[test]
    fn parse_null_message_fails() {
        let err = parse_completion(r#"{"choices":[{"message":null}]}"#).unwrap_err();
        assert!(matches!(err, LlmError::MissingMessage));
    }

    #[test]
    fn parse_garbage_fails_as_json() {
        assert!(matches!(
            parse_completion("not json"),
            Err(LlmError::Json(_))
        ));
    }

    #[test]
    fn new_rejects_non_http_server() {
        let err = HttpChatClient::new("ftp://h", "/v1", "token").unwrap_err();
        assert!(matches!(err, LlmError::InvalidUrl(_)));
    }

    #[test]
    fn debug_redacts_token() {
        let client = HttpChatClient::new("http://h", "/v1/chat/completions", "sk-secret").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(client.url(), "http://h/v1/chat/completions");
    }
}
