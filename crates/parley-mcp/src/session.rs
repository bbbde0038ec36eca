use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use eventsource_stream::Eventsource;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::config::{ReconnectPolicy, ServerEntry};
use crate::error::McpError;
use crate::protocol::{
    INITIALIZE_ID, Inbound, InitializeResult, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_CHANGED, METHOD_TOOLS_LIST, RpcError, RpcMessage, RpcReply,
    RpcRequest, ToolsListResult, call_params, initialize_params, list_params,
};
use crate::tool::McpTool;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Event stream requested, waiting for the `endpoint` event.
    Connecting,
    /// `initialize` / `tools/list` exchange in progress.
    Handshaking,
    Ready,
    /// Shut down; terminal.
    Closed,
}

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

/// State scoped to one event-stream connection; reset on disconnect.
#[derive(Debug, Default)]
struct Connection {
    endpoint: Option<Url>,
    cancel: Option<CancellationToken>,
    protocol_version: Option<String>,
    list_id: Option<u64>,
    listed: Vec<McpTool>,
}

struct Shared {
    entry: ServerEntry,
    stream_client: reqwest::Client,
    post_client: reqwest::Client,
    state: watch::Sender<SessionState>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Waiter>>,
    conn: Mutex<Connection>,
    tools: RwLock<Vec<McpTool>>,
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client side of one MCP server reached over an SSE event stream.
///
/// Cloning yields another handle to the same session. The underlying
/// connection is opened lazily by [`McpSession::connect`] or the first call,
/// and may be re-established any number of times until
/// [`McpSession::shutdown`].
#[derive(Clone)]
pub struct McpSession {
    shared: Arc<Shared>,
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("server_id", &self.shared.entry.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl McpSession {
    /// # Errors
    ///
    /// Returns `McpError::InvalidUrl` for a non-http(s) server URL, or
    /// `McpError::Client` if an HTTP client cannot be built.
    pub fn new(entry: ServerEntry) -> Result<Self, McpError> {
        entry.stream_url()?;
        let user_agent = concat!("parley/", env!("CARGO_PKG_VERSION"));
        let stream_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()?;
        let post_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(POST_TIMEOUT)
            .user_agent(user_agent)
            .build()?;
        let (state, _) = watch::channel(SessionState::Disconnected);
        Ok(Self {
            shared: Arc::new(Shared {
                entry,
                stream_client,
                post_client,
                state,
                next_id: AtomicU64::new(INITIALIZE_ID + 1),
                pending: Mutex::new(HashMap::new()),
                conn: Mutex::new(Connection::default()),
                tools: RwLock::new(Vec::new()),
                last_error: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.entry.id
    }

    #[must_use]
    pub fn entry(&self) -> &ServerEntry {
        &self.shared.entry
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Tools from the most recent `tools/list`; kept while disconnected.
    #[must_use]
    pub fn tools(&self) -> Vec<McpTool> {
        self.shared
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Protocol version the server agreed to on the current connection.
    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        lock(&self.shared.conn).protocol_version.clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Start connecting if the session is disconnected.
    ///
    /// Returns `true` when this call started a new connection attempt.
    pub fn connect(&self) -> bool {
        if !self.shared.try_begin_connect() {
            return false;
        }
        let shared = Arc::clone(&self.shared);
        let span = tracing::info_span!("mcp_session", server_id = %shared.entry.id);
        tokio::spawn(run(shared).instrument(span));
        true
    }

    /// Make one connection attempt and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns `McpError::Connection` when the attempt ends disconnected,
    /// `McpError::ReadyTimeout` past the configured ready timeout, and
    /// `McpError::Closed` after shutdown.
    pub async fn connect_and_wait(&self) -> Result<(), McpError> {
        self.connect();
        let mut rx = self.subscribe();
        let attempt = async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    SessionState::Ready => return Ok(()),
                    SessionState::Closed => return Err(self.closed()),
                    SessionState::Disconnected => {
                        return Err(self.shared.connection_error(
                            self.last_error()
                                .unwrap_or_else(|| "event stream closed during handshake".into()),
                        ));
                    }
                    SessionState::Connecting | SessionState::Handshaking => {}
                }
                if rx.changed().await.is_err() {
                    return Err(self.closed());
                }
            }
        };
        self.bounded(attempt).await
    }

    /// Wait until the session is ready, reconnecting as needed.
    ///
    /// Without a configured ready timeout this waits until the server comes
    /// back, retrying every `retry_delay`.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ReadyTimeout` past the configured ready timeout and
    /// `McpError::Closed` after shutdown.
    pub async fn wait_ready(&self) -> Result<(), McpError> {
        let mut rx = self.subscribe();
        let wait = async {
            let mut attempts: u32 = 0;
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    SessionState::Ready => return Ok(()),
                    SessionState::Closed => return Err(self.closed()),
                    SessionState::Disconnected => {
                        if attempts > 0 {
                            tracing::debug!(
                                server_id = %self.id(),
                                attempts,
                                "MCP server still unavailable, retrying"
                            );
                            tokio::time::sleep(self.shared.entry.retry_delay).await;
                        }
                        attempts = attempts.saturating_add(1);
                        self.connect();
                        continue;
                    }
                    SessionState::Connecting | SessionState::Handshaking => {}
                }
                if rx.changed().await.is_err() {
                    return Err(self.closed());
                }
            }
        };
        self.bounded(wait).await
    }

    async fn bounded<F>(&self, wait: F) -> Result<(), McpError>
    where
        F: Future<Output = Result<(), McpError>>,
    {
        match self.shared.entry.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                McpError::ReadyTimeout {
                    server_id: self.id().to_owned(),
                    waited_secs: limit.as_secs(),
                }
            })?,
            None => wait.await,
        }
    }

    /// Call a tool and wait up to the heartbeat interval for its result.
    ///
    /// Returns `Ok(None)` when no response arrives in time or the connection
    /// drops before the response does.
    ///
    /// # Errors
    ///
    /// Returns an error when the session cannot become ready, the request
    /// cannot be posted, or the server answers with a JSON-RPC error.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Option<Value>, McpError> {
        self.wait_ready().await?;
        let shared = &self.shared;
        let id = shared.next_id();
        let (tx, rx) = oneshot::channel();
        lock(&shared.pending).insert(id, tx);

        tracing::debug!(server_id = %self.id(), id, tool = name, "calling MCP tool");
        let request = RpcRequest::new(id, METHOD_TOOLS_CALL, call_params(name, arguments));
        if let Err(e) = shared.post(&request).await {
            lock(&shared.pending).remove(&id);
            return Err(e);
        }

        let heartbeat = shared.entry.heartbeat;
        match tokio::time::timeout(heartbeat, rx).await {
            Ok(Ok(Ok(result))) => Ok(Some(result)),
            Ok(Ok(Err(err))) => Err(McpError::Rpc {
                server_id: self.id().to_owned(),
                method: METHOD_TOOLS_CALL.into(),
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => {
                tracing::warn!(server_id = %self.id(), id, tool = name, "connection lost before tool response");
                Ok(None)
            }
            Err(_) => {
                lock(&shared.pending).remove(&id);
                tracing::warn!(
                    server_id = %self.id(),
                    id,
                    tool = name,
                    timeout_secs = heartbeat.as_secs(),
                    "no tool response before heartbeat"
                );
                Ok(None)
            }
        }
    }

    /// Close the session for good and abandon pending calls.
    pub fn shutdown(&self) {
        self.shared.state.send_replace(SessionState::Closed);
        self.shared.shutdown.cancel();
        let abandoned = {
            let mut pending = lock(&self.shared.pending);
            let count = pending.len();
            pending.clear();
            count
        };
        tracing::info!(server_id = %self.id(), abandoned, "MCP session shut down");
    }

    fn closed(&self) -> McpError {
        McpError::Closed {
            server_id: self.id().to_owned(),
        }
    }
}

/// Connection loop owned by the reader task.
async fn run(shared: Arc<Shared>) {
    loop {
        let cancel = shared.shutdown.child_token();
        let outcome = shared.read_stream(&cancel).await;
        cancel.cancel();
        shared.disconnected(outcome.err());

        if shared.shutdown.is_cancelled() {
            return;
        }
        let ReconnectPolicy::Immediate { delay } = shared.entry.reconnect else {
            return;
        };
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shared.shutdown.cancelled() => return,
        }
        if !shared.try_begin_connect() {
            return;
        }
        tracing::info!(delay_secs = delay.as_secs(), "reconnecting to MCP server");
    }
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn try_begin_connect(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Disconnected {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Move to `next` unless already there or closed.
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next || *state == SessionState::Closed {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "session state");
            *state = next;
            true
        });
    }

    fn connection_error(&self, message: impl Into<String>) -> McpError {
        McpError::Connection {
            server_id: self.entry.id.clone(),
            message: message.into(),
        }
    }

    fn record_error(&self, err: &McpError) {
        *lock(&self.last_error) = Some(err.to_string());
    }

    fn cancel_connection(&self) {
        if let Some(cancel) = &lock(&self.conn).cancel {
            cancel.cancel();
        }
    }

    async fn read_stream(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), McpError> {
        lock(&self.conn).cancel = Some(cancel.clone());
        let url = self.entry.stream_url()?;
        tracing::debug!(%url, "opening event stream");

        let mut request = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream");
        if let Some(bearer) = self.entry.bearer() {
            request = request.header(AUTHORIZATION, bearer);
        }
        let response = tokio::select! {
            response = request.send() => response.map_err(|e| self.connection_error(e.to_string()))?,
            () = cancel.cancelled() => return Ok(()),
        };
        let status = response.status();
        if !status.is_success() {
            return Err(self.connection_error(format!("event stream returned {status}")));
        }

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());
        loop {
            let next = tokio::select! {
                next = events.next() => next,
                () = cancel.cancelled() => return Ok(()),
            };
            let Some(event) = next else {
                return Ok(());
            };
            let event = event.map_err(|e| self.connection_error(e.to_string()))?;
            match event.event.as_str() {
                "endpoint" => self.on_endpoint(&event.data),
                "message" | "" => self.on_message(&event.data),
                other => tracing::debug!(event = other, "ignoring event"),
            }
        }
    }

    fn disconnected(&self, err: Option<McpError>) {
        match &err {
            Some(e) => {
                tracing::warn!(error = %e, "MCP event stream failed");
                self.record_error(e);
            }
            None => tracing::info!("MCP event stream closed"),
        }
        *lock(&self.conn) = Connection::default();
        self.set_state(SessionState::Disconnected);
        let abandoned: Vec<Waiter> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "abandoning in-flight calls");
        }
    }

    fn on_endpoint(self: &Arc<Self>, data: &str) {
        let endpoint = match self.entry.resolve(data) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "unusable endpoint event");
                self.record_error(&e);
                self.cancel_connection();
                return;
            }
        };
        tracing::debug!(%endpoint, "message endpoint advertised");
        {
            let mut conn = lock(&self.conn);
            conn.endpoint = Some(endpoint);
            conn.protocol_version = None;
            conn.list_id = None;
            conn.listed.clear();
        }
        self.set_state(SessionState::Handshaking);
        self.spawn_handshake(vec![RpcRequest::new(
            INITIALIZE_ID,
            METHOD_INITIALIZE,
            initialize_params(&self.entry),
        )]);
    }

    fn on_message(self: &Arc<Self>, data: &str) {
        let message: RpcMessage = match serde_json::from_str(data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed message event");
                return;
            }
        };
        match message.classify() {
            Inbound::Response { id, outcome } => self.on_response(id, outcome),
            Inbound::Request { id, method } => {
                tracing::debug!(%method, "server request");
                self.spawn_reply(RpcReply::to(id, &method));
            }
            Inbound::Notification { method } => {
                if method == METHOD_TOOLS_CHANGED && *self.state.borrow() == SessionState::Ready {
                    tracing::info!("server tool list changed, refreshing");
                    self.request_tool_list(None);
                } else {
                    tracing::debug!(%method, "server notification");
                }
            }
            Inbound::Unrecognized => tracing::debug!("unrecognized message event"),
        }
    }

    fn on_response(self: &Arc<Self>, id: u64, outcome: Result<Value, RpcError>) {
        if id == INITIALIZE_ID {
            self.on_initialize_response(outcome);
            return;
        }
        if lock(&self.conn).list_id == Some(id) {
            self.on_tool_list(outcome);
            return;
        }
        let waiter = lock(&self.pending).remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::debug!(id, "response for unknown or abandoned request"),
        }
    }

    fn on_initialize_response(self: &Arc<Self>, outcome: Result<Value, RpcError>) {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.handshake_failed(METHOD_INITIALIZE, &err);
                return;
            }
        };
        let init: InitializeResult = serde_json::from_value(result).unwrap_or_default();
        let version = init
            .protocol_version
            .unwrap_or_else(|| self.entry.protocol_version.clone());
        if let Some(info) = &init.server_info {
            tracing::info!(
                server_name = %info.name,
                server_version = %info.version,
                protocol_version = %version,
                "MCP server initialized"
            );
        }
        let list_id = self.next_id();
        {
            let mut conn = lock(&self.conn);
            conn.protocol_version = Some(version);
            conn.list_id = Some(list_id);
        }
        self.spawn_handshake(vec![
            RpcRequest::notification(METHOD_INITIALIZED),
            RpcRequest::new(list_id, METHOD_TOOLS_LIST, list_params(None)),
        ]);
    }

    fn request_tool_list(self: &Arc<Self>, cursor: Option<&str>) {
        let id = self.next_id();
        {
            let mut conn = lock(&self.conn);
            conn.list_id = Some(id);
            if cursor.is_none() {
                conn.listed.clear();
            }
        }
        self.spawn_handshake(vec![RpcRequest::new(
            id,
            METHOD_TOOLS_LIST,
            list_params(cursor),
        )]);
    }

    fn on_tool_list(self: &Arc<Self>, outcome: Result<Value, RpcError>) {
        let page = match outcome {
            Ok(result) => serde_json::from_value::<ToolsListResult>(result),
            Err(err) => {
                self.handshake_failed(METHOD_TOOLS_LIST, &err);
                return;
            }
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                let err = RpcError {
                    code: 0,
                    message: format!("malformed tools/list result: {e}"),
                    data: None,
                };
                self.handshake_failed(METHOD_TOOLS_LIST, &err);
                return;
            }
        };

        let tools = {
            let mut conn = lock(&self.conn);
            conn.listed.extend(
                page.tools
                    .into_iter()
                    .map(|t| McpTool::from_listed(&self.entry.id, t)),
            );
            if page.next_cursor.as_deref().is_some_and(|c| !c.is_empty()) {
                None
            } else {
                conn.list_id = None;
                Some(std::mem::take(&mut conn.listed))
            }
        };
        let Some(tools) = tools else {
            self.request_tool_list(page.next_cursor.as_deref());
            return;
        };

        let count = tools.len();
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
        *lock(&self.last_error) = None;
        self.set_state(SessionState::Ready);
        tracing::info!(tools = count, "MCP session ready");
    }

    /// A handshake step was refused. Drops the connection unless the session
    /// was already ready, in which case the previous tool list stays.
    fn handshake_failed(&self, method: &str, err: &RpcError) {
        let error = McpError::Rpc {
            server_id: self.entry.id.clone(),
            method: method.to_owned(),
            code: err.code,
            message: err.message.clone(),
        };
        tracing::warn!(error = %error, "MCP handshake step failed");
        self.record_error(&error);
        if *self.state.borrow() == SessionState::Ready {
            lock(&self.conn).list_id = None;
        } else {
            self.cancel_connection();
        }
    }

    fn spawn_handshake(self: &Arc<Self>, requests: Vec<RpcRequest<'static>>) {
        let shared = Arc::clone(self);
        tokio::spawn(
            async move {
                for request in requests {
                    if let Err(e) = shared.post(&request).await {
                        tracing::warn!(method = request.method, error = %e, "handshake request failed");
                        shared.record_error(&e);
                        shared.cancel_connection();
                        return;
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn spawn_reply(self: &Arc<Self>, reply: RpcReply) {
        let shared = Arc::clone(self);
        tokio::spawn(
            async move {
                if let Err(e) = shared.post(&reply).await {
                    tracing::warn!(error = %e, "failed to answer server request");
                }
            }
            .in_current_span(),
        );
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<(), McpError> {
        let endpoint = lock(&self.conn)
            .endpoint
            .clone()
            .ok_or_else(|| self.connection_error("no message endpoint advertised"))?;
        let mut request = self.post_client.post(endpoint).json(body);
        if let Some(bearer) = self.entry.bearer() {
            request = request.header(AUTHORIZATION, bearer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.connection_error(format!("POST to message endpoint returned {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> McpSession {
        McpSession::new(ServerEntry::new("docs", "http://127.0.0.1:1")).unwrap()
    }

    #[test]
    fn starts_disconnected_without_tools() {
        let s = session();
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(s.tools().is_empty());
        assert!(s.protocol_version().is_none());
    }

    #[test]
    fn rejects_invalid_server() {
        let err = McpSession::new(ServerEntry::new("docs", "not a url")).unwrap_err();
        assert!(matches!(err, McpError::InvalidUrl { .. }));
    }

    #[test]
    fn request_ids_are_unique_and_skip_initialize() {
        let s = session();
        let a = s.shared.next_id();
        let b = s.shared.next_id();
        assert_ne!(a, INITIALIZE_ID);
        assert!(b > a);
    }

    #[test]
    fn only_one_connect_attempt_wins() {
        let s = session();
        assert!(s.shared.try_begin_connect());
        assert!(!s.shared.try_begin_connect());
        assert_eq!(s.state(), SessionState::Connecting);
    }

    #[test]
    fn closed_is_terminal() {
        let s = session();
        s.shared.state.send_replace(SessionState::Closed);
        s.shared.set_state(SessionState::Ready);
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.shared.try_begin_connect());
    }

    #[test]
    fn response_fulfils_matching_waiter_only() {
        let s = session();
        let (tx, mut rx) = oneshot::channel();
        lock(&s.shared.pending).insert(5, tx);
        s.shared.on_message(r#"{"jsonrpc":"2.0","id":6,"result":{}}"#);
        assert!(rx.try_recv().is_err());
        s.shared.on_message(r#"{"jsonrpc":"2.0","id":5,"result":{"ok":1}}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), serde_json::json!({"ok": 1}));
        assert!(lock(&s.shared.pending).is_empty());
    }

    #[test]
    fn disconnect_abandons_waiters() {
        let s = session();
        let (tx, mut rx) = oneshot::channel();
        lock(&s.shared.pending).insert(9, tx);
        s.shared.state.send_replace(SessionState::Ready);
        s.shared.disconnected(None);
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn wait_ready_times_out_against_dead_server() {
        let s = McpSession::new(
            ServerEntry::new("docs", "http://127.0.0.1:1")
                .with_ready_timeout(Duration::from_millis(300))
                .with_retry_delay(Duration::from_millis(50)),
        )
        .unwrap();
        let err = s.wait_ready().await.unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
    }

    #[tokio::test]
    async fn connect_and_wait_reports_refused_connection() {
        let s = session();
        let err = s.connect_and_wait().await.unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }), "got {err:?}");
        assert!(s.last_error().is_some());
    }

    #[tokio::test]
    async fn calls_after_shutdown_fail_closed() {
        let s = session();
        s.shutdown();
        let err = s.call_tool("search", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Closed { .. }));
    }
}
