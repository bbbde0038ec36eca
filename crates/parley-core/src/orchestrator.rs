use std::sync::Arc;

use parley_llm::{
    ChatCompletion, ChatProvider, ChatRequest, GenerationParams, Message, Role, ToolCall, Usage,
};
use parley_memory::MessageStore;
use parley_tools::ToolRegistry;
use tracing::Instrument;

use crate::config::Config;
use crate::error::ChatError;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// Per-exchange overrides.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    /// Model to use instead of the configured default.
    pub model: Option<String>,
    pub stop: Option<Vec<String>>,
    /// Local tools offered with this request. Remote tools are always offered.
    pub tools: Vec<String>,
    /// Remove tool calls and tool results from the store once the exchange
    /// has used tools.
    pub clear_tool_messages: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            model: None,
            stop: None,
            tools: Vec::new(),
            clear_tool_messages: true,
        }
    }
}

impl ExchangeOptions {
    #[must_use]
    pub fn with_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn keep_tool_messages(mut self) -> Self {
        self.clear_tool_messages = false;
        self
    }
}

/// Final answer of an exchange.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub message: Message,
    /// Token usage summed over every request the exchange sent.
    pub usage: Usage,
    /// Number of tool rounds run before the answer.
    pub tool_rounds: usize,
    /// Store the exchange read from and wrote to.
    pub store: Arc<MessageStore>,
}

/// Request fields that apply unless an exchange overrides them.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    pub model: String,
    pub params: GenerationParams,
    pub stream: bool,
}

impl RequestDefaults {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.chat.model.clone(),
            params: config.generation_params(),
            stream: config.chat.stream,
        }
    }
}

/// Drives tool-augmented exchanges against a chat provider.
///
/// The store and registry are shared; concurrent exchanges on one
/// orchestrator interleave their messages in the same conversation.
pub struct ChatOrchestrator<P> {
    provider: P,
    store: Arc<MessageStore>,
    registry: Arc<ToolRegistry>,
    defaults: RequestDefaults,
    max_tool_rounds: usize,
}

impl<P> std::fmt::Debug for ChatOrchestrator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("store", &self.store)
            .field("defaults", &self.defaults)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish_non_exhaustive()
    }
}

impl<P: ChatProvider> ChatOrchestrator<P> {
    pub fn new(
        provider: P,
        store: Arc<MessageStore>,
        registry: Arc<ToolRegistry>,
        defaults: RequestDefaults,
    ) -> Self {
        Self {
            provider,
            store,
            registry,
            defaults,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Orchestrator with a fresh store sized by `chat.history_limit`.
    pub fn from_config(provider: P, config: &Config, registry: Arc<ToolRegistry>) -> Self {
        let store = Arc::new(MessageStore::new(config.chat.history_limit));
        Self::new(provider, store, registry, RequestDefaults::from_config(config))
            .with_max_tool_rounds(config.chat.max_tool_rounds)
    }

    #[must_use]
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Send `user_text` and run tool rounds until the model answers in plain
    /// text or the round limit is reached.
    ///
    /// Tool failures are fed back to the model as tool results. Messages
    /// appended before a failure stay in the store.
    ///
    /// # Errors
    ///
    /// Returns `TransportFailure` or `ResponseParseError` when a chat request
    /// fails.
    pub async fn exchange(
        &self,
        user_text: &str,
        options: &ExchangeOptions,
    ) -> Result<ExchangeResult, ChatError> {
        let request_id = uuid::Uuid::new_v4();
        self.run_exchange(user_text, options)
            .instrument(tracing::info_span!("exchange", %request_id))
            .await
    }

    async fn run_exchange(
        &self,
        user_text: &str,
        options: &ExchangeOptions,
    ) -> Result<ExchangeResult, ChatError> {
        self.store.append(Message::user(user_text));

        let mut usage = Usage::default();
        let mut tool_rounds = 0;
        let outcome = loop {
            let completion = match self.complete(options).await {
                Ok(completion) => completion,
                Err(e) => break Err(e),
            };
            if let Some(u) = completion.usage {
                usage.prompt_tokens += u.prompt_tokens;
                usage.completion_tokens += u.completion_tokens;
                usage.total_tokens += u.total_tokens;
            }

            let message = completion.message;
            self.store.append(message.clone());
            if message.role != Role::Assistant || !message.has_tool_calls() {
                break Ok(message);
            }

            tool_rounds += 1;
            self.run_tool_round(&message.tool_calls, tool_rounds).await;
            if tool_rounds >= self.max_tool_rounds {
                tracing::warn!(
                    rounds = tool_rounds,
                    "tool round limit reached, returning last assistant message"
                );
                break Ok(message);
            }
        };

        if tool_rounds > 0 && options.clear_tool_messages {
            let pruned = self.store.prune_tool_artifacts();
            tracing::debug!(pruned, "removed tool scaffolding from history");
        }

        let message = outcome?;
        Ok(ExchangeResult {
            message,
            usage,
            tool_rounds,
            store: Arc::clone(&self.store),
        })
    }

    async fn complete(&self, options: &ExchangeOptions) -> Result<ChatCompletion, ChatError> {
        let request = ChatRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.defaults.model.clone()),
            params: self.defaults.params.clone(),
            stop: options.stop.clone(),
            stream: self.defaults.stream,
            messages: self.store.snapshot().request_messages(),
            tools: self.registry.definitions_for(&options.tools),
        };
        let llm_span = tracing::info_span!("llm_call", model = %request.model);
        self.provider
            .complete(&request)
            .instrument(llm_span)
            .await
            .map_err(|e| {
                tracing::error!(provider = self.provider.name(), error = %e, "chat request failed");
                ChatError::from(e)
            })
    }

    /// Invoke every call concurrently and append results in call order.
    async fn run_tool_round(&self, calls: &[ToolCall], round: usize) {
        tracing::debug!(round, calls = calls.len(), "running tool round");
        let futs: Vec<_> = calls
            .iter()
            .map(|call| {
                self.registry
                    .invoke(&call.function.name, &call.function.arguments)
                    .instrument(tracing::info_span!(
                        "tool_exec",
                        tool_name = %call.function.name,
                        call_id = %call.id
                    ))
            })
            .collect();
        let results = futures::future::join_all(futs).await;
        for (call, result) in calls.iter().zip(results) {
            self.store.append(Message::tool(&call.id, result.content));
        }
    }
}
