use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use futures::Stream;
use parley_mcp::{McpManager, McpSession, ReconnectPolicy, ServerEntry, SessionState};
use parley_tools::{RemoteToolSource, ToolRegistry};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// In-process MCP server speaking the SSE transport. Tool lists are served
/// one tool per page.
#[derive(Default)]
struct MockMcp {
    stream: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    tools: Mutex<Vec<&'static str>>,
    answer_calls: AtomicBool,
    /// Hold the next call's reply until another call has been answered.
    hold_next_call: AtomicBool,
    held: Mutex<Option<Value>>,
    answered: Mutex<Vec<Value>>,
    connections: AtomicUsize,
    posted: Mutex<Vec<Value>>,
}

impl MockMcp {
    fn push(&self, message: &Value) {
        if let Some(tx) = self.stream.lock().unwrap().as_ref() {
            let _ = tx.send(Event::default().event("message").data(message.to_string()));
        }
    }

    fn answer(&self, reply: &Value) {
        self.answered.lock().unwrap().push(reply["id"].clone());
        self.push(reply);
    }

    fn drop_stream(&self) {
        self.stream.lock().unwrap().take();
    }

    fn posted_ids(&self) -> Vec<Value> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.get("method").is_none())
            .filter_map(|m| m.get("id").cloned())
            .collect()
    }
}

async fn open_stream(
    State(mock): State<Arc<MockMcp>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Event::default().event("endpoint").data("/messages?session_id=1"));
    *mock.stream.lock().unwrap() = Some(tx);
    mock.connections.fetch_add(1, Ordering::SeqCst);
    Sse::new(tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(Ok))
}

async fn receive(State(mock): State<Arc<MockMcp>>, Json(body): Json<Value>) -> StatusCode {
    mock.posted.lock().unwrap().push(body.clone());
    let id = body["id"].clone();
    match body["method"].as_str() {
        Some("initialize") => mock.push(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2025-05-05",
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "mock", "version": "1.0.0"}
            }
        })),
        Some("tools/list") => {
            let tools = mock.tools.lock().unwrap().clone();
            let index: usize = body["params"]["cursor"]
                .as_str()
                .map_or(0, |c| c.parse().unwrap());
            let mut result = json!({
                "tools": [{
                    "name": tools[index],
                    "description": format!("{} tool", tools[index]),
                    "inputSchema": {
                        "type": "object",
                        "properties": {"q": {"type": "string"}},
                        "required": ["q"]
                    }
                }]
            });
            if index + 1 < tools.len() {
                result["nextCursor"] = json!((index + 1).to_string());
            }
            mock.push(&json!({"jsonrpc": "2.0", "id": id, "result": result}));
        }
        Some("tools/call") if mock.answer_calls.load(Ordering::SeqCst) => {
            let params = &body["params"];
            let result = if params["name"] == "broken" {
                json!({"content": [{"type": "text", "text": "index offline"}], "isError": true})
            } else {
                let text = format!("found: {}", params["arguments"]["q"].as_str().unwrap_or(""));
                json!({"content": [{"type": "text", "text": text}]})
            };
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            if mock.hold_next_call.swap(false, Ordering::SeqCst) {
                *mock.held.lock().unwrap() = Some(reply);
            } else {
                mock.answer(&reply);
                let held = mock.held.lock().unwrap().take();
                if let Some(held) = held {
                    mock.answer(&held);
                }
            }
        }
        _ => {}
    }
    StatusCode::ACCEPTED
}

async fn start(tools: &[&'static str]) -> (Arc<MockMcp>, SocketAddr) {
    let mock = Arc::new(MockMcp::default());
    mock.tools.lock().unwrap().extend_from_slice(tools);
    mock.answer_calls.store(true, Ordering::SeqCst);
    let router = Router::new()
        .route("/sse", get(open_stream))
        .route("/messages", post(receive))
        .with_state(Arc::clone(&mock));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (mock, addr)
}

fn entry(addr: SocketAddr) -> ServerEntry {
    ServerEntry::new("docs", format!("http://{addr}"))
        .with_heartbeat(Duration::from_millis(500))
        .with_retry_delay(Duration::from_millis(50))
        .with_ready_timeout(Duration::from_secs(5))
}

async fn wait_for(session: &McpSession, target: SessionState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
        .await
        .expect("state not reached in time")
        .map(|_| ())
        .expect("session dropped");
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn handshake_lists_every_page_of_tools() {
    let (_mock, addr) = start(&["search", "fetch"]).await;
    let session = McpSession::new(entry(addr)).unwrap();

    session.connect_and_wait().await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.protocol_version().as_deref(), Some("2025-05-05"));
    let names: Vec<String> = session.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["search", "fetch"]);
    session.shutdown();
}

#[tokio::test]
async fn initialize_uses_id_zero_then_notifies() {
    let (mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();

    let posted = mock.posted.lock().unwrap().clone();
    assert_eq!(posted[0]["method"], "initialize");
    assert_eq!(posted[0]["id"], 0);
    assert_eq!(posted[0]["params"]["clientInfo"]["name"], "mcp-client");
    assert_eq!(posted[1]["method"], "notifications/initialized");
    assert!(posted[1].get("id").is_none());
    assert_eq!(posted[2]["method"], "tools/list");
    session.shutdown();
}

#[tokio::test]
async fn concurrent_calls_are_matched_by_id_not_arrival_order() {
    let (mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();
    mock.hold_next_call.store(true, Ordering::SeqCst);

    let (alpha, beta) = tokio::join!(
        session.call_tool("search", json!({"q": "alpha"})),
        session.call_tool("search", json!({"q": "beta"})),
    );
    let alpha = alpha.unwrap().expect("alpha answered before heartbeat");
    let beta = beta.unwrap().expect("beta answered before heartbeat");
    assert_eq!(alpha["content"][0]["text"], "found: alpha");
    assert_eq!(beta["content"][0]["text"], "found: beta");

    let call_ids: Vec<Value> = mock
        .posted
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m["method"] == "tools/call")
        .map(|m| m["id"].clone())
        .collect();
    assert_eq!(call_ids.len(), 2);
    assert_ne!(call_ids[0], call_ids[1]);
    let answered = mock.answered.lock().unwrap().clone();
    assert_eq!(answered, [call_ids[1].clone(), call_ids[0].clone()]);
    session.shutdown();
}

#[tokio::test]
async fn tool_call_is_correlated_by_id() {
    let (_mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr)).unwrap();

    let result = session
        .call_tool("search", json!({"q": "rust"}))
        .await
        .unwrap()
        .expect("response before heartbeat");
    assert_eq!(result["content"][0]["text"], "found: rust");

    let source: &dyn RemoteToolSource = &session;
    let text = source.call("search", json!({"q": "sse"})).await.unwrap();
    assert_eq!(text, "found: sse");
    session.shutdown();
}

#[tokio::test]
async fn error_flagged_result_becomes_tool_error() {
    let (_mock, addr) = start(&["broken"]).await;
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();
    let registry = ToolRegistry::new();
    registry.register(parley_tools::ToolSource::Remote(Arc::new(session.clone())));

    let result = registry.invoke("broken", r#"{"q":"x"}"#).await;
    assert!(result.is_error);
    assert!(result.content.starts_with("call failed! msg:"));
    assert!(result.content.contains("index offline"));
    session.shutdown();
}

#[tokio::test]
async fn silent_server_yields_no_result_after_heartbeat() {
    let (mock, addr) = start(&["search"]).await;
    mock.answer_calls.store(false, Ordering::SeqCst);
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();

    let outcome = session.call_tool("search", json!({"q": "x"})).await.unwrap();
    assert!(outcome.is_none());

    let registry = ToolRegistry::new();
    registry.register(parley_tools::ToolSource::Remote(Arc::new(session.clone())));
    let result = registry.invoke("search", r#"{"q":"x"}"#).await;
    assert_eq!(
        result.content,
        "call failed! msg: no result from search before timeout"
    );
    session.shutdown();
}

#[tokio::test]
async fn dropped_stream_reconnects_on_next_use() {
    let (mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();

    mock.drop_stream();
    wait_for(&session, SessionState::Disconnected).await;
    assert_eq!(session.tools().len(), 1, "tool list survives a disconnect");
    assert_eq!(mock.connections.load(Ordering::SeqCst), 1);

    let result = session.call_tool("search", json!({"q": "again"})).await.unwrap();
    assert_eq!(result.unwrap()["content"][0]["text"], "found: again");
    assert_eq!(mock.connections.load(Ordering::SeqCst), 2);
    session.shutdown();
}

#[tokio::test]
async fn immediate_policy_reconnects_without_a_call() {
    let (mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr).with_reconnect(ReconnectPolicy::Immediate {
        delay: Duration::from_millis(50),
    }))
    .unwrap();
    session.connect_and_wait().await.unwrap();

    mock.drop_stream();
    eventually(|| mock.connections.load(Ordering::SeqCst) == 2).await;
    wait_for(&session, SessionState::Ready).await;
    session.shutdown();
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();

    mock.push(&json!({"jsonrpc": "2.0", "id": "ping-1", "method": "ping"}));
    eventually(|| mock.posted_ids().contains(&json!("ping-1"))).await;
    session.shutdown();
}

#[tokio::test]
async fn list_changed_notification_refreshes_tools() {
    let (mock, addr) = start(&["search"]).await;
    let session = McpSession::new(entry(addr)).unwrap();
    session.connect_and_wait().await.unwrap();

    mock.tools.lock().unwrap().push("fetch");
    mock.push(&json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}));
    eventually(|| session.tools().len() == 2).await;
    assert_eq!(session.state(), SessionState::Ready);
    session.shutdown();
}

#[tokio::test]
async fn manager_connects_reachable_servers_only() {
    let (_mock, addr) = start(&["search"]).await;
    let manager = McpManager::new(vec![
        entry(addr),
        ServerEntry::new("down", "http://127.0.0.1:1"),
    ])
    .unwrap();

    let tools = manager.connect_all().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].qualified_name(), "docs:search");
    assert_eq!(manager.session("docs").unwrap().state(), SessionState::Ready);
    assert_eq!(
        manager.session("down").unwrap().state(),
        SessionState::Disconnected
    );
    manager.shutdown_all();
}
