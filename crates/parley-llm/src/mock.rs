//! Test-only scripted chat provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{ChatCompletion, ChatProvider, ChatRequest, Message};

/// Replays queued replies in order and records every request it receives.
///
/// Once the queue is empty it answers with `default_response`.
#[derive(Debug, Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<VecDeque<Result<ChatCompletion, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    pub default_response: String,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_messages(messages: Vec<Message>) -> Self {
        let provider = Self::default();
        for message in messages {
            provider.push(message);
        }
        provider
    }

    /// Provider whose first call fails with a 500 status.
    #[must_use]
    pub fn failing() -> Self {
        let provider = Self::default();
        provider.push_failure("mock transport failure");
        provider
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn push(&self, message: Message) {
        self.push_completion(ChatCompletion::from_message(message));
    }

    pub fn push_completion(&self, completion: ChatCompletion) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(completion));
    }

    /// Queue a failure answered as a 500 status.
    pub fn push_failure(&self, body: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(body.into()));
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChatProvider for MockProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(body)) => Err(LlmError::Status { status: 500, body }),
            None => Ok(ChatCompletion::from_message(Message::assistant(
                self.default_response.clone(),
            ))),
        }
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
