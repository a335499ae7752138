//! Mock upstream model server
//!
//! An in-process stand-in for the upstream server, used by the integration
//! tests of the transaction coordinator and the gateway. It hands out
//! transaction endpoints, speaks the transaction WebSocket protocol with
//! scriptable replies, records everything it receives, serves an echo
//! WebSocket for bridge tests, and answers every other HTTP request with a
//! recognizable JSON body so forwarding can be asserted.

#![forbid(unsafe_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use modelgate_upstream::UpstreamConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Builds the reply envelope for an inbound `execute` envelope.
///
/// Returning `None` suppresses the reply, which lets tests exercise reply
/// timeouts.
pub type ReplyScript = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct MockState {
    /// Filled in once the listener is bound; transaction URIs embed it
    addr: std::sync::OnceLock<SocketAddr>,
    /// Every envelope received on any transaction socket, in arrival order
    transaction_log: Mutex<Vec<Value>>,
    /// Every non-transaction HTTP request, as `METHOD path?query`
    http_log: Mutex<Vec<String>>,
    script: Mutex<Arc<ReplyScript>>,
}

/// Handle to a running mock upstream
pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    /// Bind an ephemeral port and start serving
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState {
            addr: std::sync::OnceLock::new(),
            transaction_log: Mutex::new(Vec::new()),
            http_log: Mutex::new(Vec::new()),
            script: Mutex::new(Arc::new(Box::new(default_reply))),
        });

        let app = Router::new()
            .route("/api/v2/transaction", post(create_transaction))
            .route("/api/v2/transaction/:id", get(transaction_socket))
            .route("/echo", get(echo_socket))
            .fallback(catch_all)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream addr");
        let _ = state.addr.set(addr);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    /// Address the mock listens on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Upstream configuration pointing at this mock
    pub fn config(&self) -> UpstreamConfig {
        UpstreamConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            ..UpstreamConfig::default()
        }
    }

    /// Replace the reply script for subsequent `execute` messages
    pub fn set_reply_script(&self, script: ReplyScript) {
        *self.state.script.lock().expect("script lock") = Arc::new(script);
    }

    /// Envelopes received on transaction sockets so far
    pub fn transaction_log(&self) -> Vec<Value> {
        self.state
            .transaction_log
            .lock()
            .expect("transaction log lock")
            .clone()
    }

    /// Message kinds received on transaction sockets so far
    pub fn transaction_kinds(&self) -> Vec<String> {
        self.transaction_log()
            .iter()
            .filter_map(|m| m.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Non-transaction HTTP requests seen so far, as `METHOD path?query`
    pub fn http_log(&self) -> Vec<String> {
        self.state.http_log.lock().expect("http log lock").clone()
    }

    /// Wait until at least `count` transaction envelopes have arrived
    pub async fn wait_transaction_log(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let log = self.transaction_log();
            if log.len() >= count {
                return log;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.transaction_log()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Default script: echo a successful incremental update carrying whatever
/// patch the edit contained
fn default_reply(envelope: &Value) -> Option<Value> {
    let modeluri = envelope.get("modeluri").cloned().unwrap_or(Value::Null);
    let patch = match envelope.pointer("/data/type").and_then(Value::as_str) {
        Some("modelserver.patch") => match envelope.pointer("/data/data") {
            Some(Value::Array(ops)) => ops.clone(),
            Some(op @ Value::Object(_)) => vec![op.clone()],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Some(json!({
        "type": "incrementalUpdate",
        "modeluri": modeluri,
        "data": { "success": true, "patch": patch }
    }))
}

async fn create_transaction(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let modeluri = params.get("modeluri").cloned().unwrap_or_default();
    let client_id = body
        .as_ref()
        .and_then(|Json(b)| b.get("data").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();
    let id = Uuid::new_v4();
    tracing::debug!(%modeluri, %client_id, %id, "mock: transaction created");
    let authority = state
        .addr
        .get()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "127.0.0.1:0".to_string());
    Json(json!({
        "data": { "uri": format!("http://{authority}/api/v2/transaction/{id}") }
    }))
}

async fn transaction_socket(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| drive_transaction(socket, id, state))
}

async fn drive_transaction(mut socket: WebSocket, id: String, state: Arc<MockState>) {
    // The first frame of a transaction session is the plain-text UUID.
    if socket.send(Message::Text(id)).await.is_err() {
        return;
    }
    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else { continue };
        let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        state
            .transaction_log
            .lock()
            .expect("transaction log lock")
            .push(envelope.clone());

        match envelope.get("type").and_then(Value::as_str) {
            Some("execute") => {
                let script = state.script.lock().expect("script lock").clone();
                if let Some(reply) = script(&envelope) {
                    let text = reply.to_string();
                    if socket.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
            }
            // Either terminator ends the session; the mock acks by closing.
            Some("close") | Some("roll-back") => break,
            _ => {}
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn echo_socket(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(frame)) = socket.recv().await {
            let reply = match frame {
                Message::Text(text) => Message::Text(text),
                Message::Binary(data) => Message::Binary(data),
                Message::Close(_) => break,
                _ => continue,
            };
            if socket.send(reply).await.is_err() {
                break;
            }
        }
    })
}

async fn catch_all(State(state): State<Arc<MockState>>, method: axum::http::Method, uri: Uri) -> impl IntoResponse {
    let line = format!(
        "{} {}",
        method,
        uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    );
    tracing::debug!(%line, "mock: http request");
    state.http_log.lock().expect("http log lock").push(line);
    Json(json!({ "data": "upstream", "path": uri.path() }))
}
