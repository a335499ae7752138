//! Transaction WebSocket wire layer
//!
//! One `TransactionSocket` per root transaction. The stream half lives in a
//! spawned reader task: the first text frame from upstream is the
//! transaction UUID, every later frame is the reply to the most recent
//! `execute`. The sink half and the reply channel sit together behind a
//! mutex so a request/reply exchange is one critical section and messages
//! for the same transaction never interleave on the wire.

use crate::config::TransactionConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use modelgate_core::{GateError, MessageKind, Result, TransactionMessage};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the transaction socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    /// Handshake done, UUID received, edits may flow
    Open,
    /// A terminator (`close` or `roll-back`) has been sent; upstream acks by
    /// closing the connection
    Closing,
    /// The connection is gone
    Closed,
}

/// State shared between the socket handle and its reader task
struct Shared {
    state: Mutex<SocketState>,
    close_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Shared {
    /// Transition to Closed and fire the close hook exactly once
    fn mark_closed(&self) {
        *self.state.lock().expect("socket state poisoned") = SocketState::Closed;
        let hook = self
            .close_hook
            .lock()
            .expect("close hook poisoned")
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Sink half plus the reply channel, locked together per exchange
struct Wire {
    sink: SplitSink<WsStream, Message>,
    replies: mpsc::Receiver<TransactionMessage>,
}

/// Wire handle for one transaction session
pub(crate) struct TransactionSocket {
    wire: tokio::sync::Mutex<Wire>,
    shared: Arc<Shared>,
}

impl TransactionSocket {
    /// Dial the transaction endpoint and complete the UUID handshake.
    ///
    /// Returns the socket and the transaction UUID delivered by upstream.
    /// No outbound message can be sent before this returns, which is what
    /// keeps the no-send-before-UUID rule.
    pub(crate) async fn connect(
        ws_url: &str,
        config: &TransactionConfig,
    ) -> Result<(Self, String)> {
        let (stream, _response) = timeout(config.connect_timeout, connect_async(ws_url))
            .await
            .map_err(|_| GateError::timeout(format!("connecting to {ws_url}")))?
            .map_err(|e| GateError::network(format!("WebSocket connect to {ws_url} failed: {e}")))?;

        let (sink, stream) = stream.split();
        let (uuid_tx, uuid_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = mpsc::channel(16);
        let shared = Arc::new(Shared {
            state: Mutex::new(SocketState::Open),
            close_hook: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(stream, uuid_tx, reply_tx, shared.clone()));

        let uuid = match timeout(config.handshake_timeout, uuid_rx).await {
            Ok(Ok(uuid)) => uuid,
            Ok(Err(_)) => {
                return Err(GateError::network(
                    "transaction socket closed before delivering a UUID",
                ))
            }
            Err(_) => {
                reader.abort();
                return Err(GateError::timeout("waiting for transaction UUID"));
            }
        };

        tracing::debug!(uuid = %uuid, url = %ws_url, "Transaction socket open");

        Ok((
            Self {
                wire: tokio::sync::Mutex::new(Wire {
                    sink,
                    replies: reply_rx,
                }),
                shared,
            },
            uuid,
        ))
    }

    /// Whether edits may still be sent
    pub(crate) fn is_open(&self) -> bool {
        *self.shared.state.lock().expect("socket state poisoned") == SocketState::Open
    }

    /// Register the hook to run when the socket reaches Closed.
    ///
    /// Fires immediately if the socket already closed, so a late
    /// registration cannot miss the event.
    pub(crate) fn on_close(&self, hook: Box<dyn FnOnce() + Send>) {
        let already_closed = {
            let state = self.shared.state.lock().expect("socket state poisoned");
            *state == SocketState::Closed
        };
        if already_closed {
            hook();
        } else {
            *self.shared.close_hook.lock().expect("close hook poisoned") = Some(hook);
        }
    }

    /// Send an `execute` and wait for its reply.
    ///
    /// Replies left over from a previous exchange that timed out or was
    /// rolled back are drained and discarded first; the channel is strict
    /// request/reply.
    pub(crate) async fn send_and_recv(
        &self,
        message: TransactionMessage,
        config: &TransactionConfig,
    ) -> Result<TransactionMessage> {
        let mut wire = self.wire.lock().await;
        if !self.is_open() {
            return Err(GateError::socket_closed(format!(
                "cannot send {} message",
                message.kind.as_str()
            )));
        }
        while let Ok(stale) = wire.replies.try_recv() {
            tracing::warn!(kind = %stale.kind.as_str(), "Discarding stale transaction reply");
        }

        let text = serde_json::to_string(&message)?;
        wire.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| GateError::network(format!("transaction send failed: {e}")))?;

        match timeout(config.reply_timeout, wire.replies.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(GateError::socket_closed(
                "transaction socket closed while awaiting a reply",
            )),
            Err(_) => Err(GateError::timeout("waiting for an edit reply")),
        }
    }

    /// Send a terminator (`close` or `roll-back`).
    ///
    /// Returns `false` without touching the wire when the socket is no
    /// longer open, which makes rollback idempotent. At most one terminator
    /// is ever sent per session.
    pub(crate) async fn send_terminator(&self, message: TransactionMessage) -> Result<bool> {
        debug_assert!(matches!(
            message.kind,
            MessageKind::Close | MessageKind::RollBack
        ));
        let mut wire = self.wire.lock().await;
        {
            let mut state = self.shared.state.lock().expect("socket state poisoned");
            if *state != SocketState::Open {
                return Ok(false);
            }
            *state = SocketState::Closing;
        }
        let text = serde_json::to_string(&message)?;
        wire.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| GateError::network(format!("terminator send failed: {e}")))?;
        tracing::debug!(kind = %message.kind.as_str(), "Sent transaction terminator");
        Ok(true)
    }
}

/// Reader task: resolve the UUID, then pump replies until the stream ends
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    uuid_tx: oneshot::Sender<String>,
    reply_tx: mpsc::Sender<TransactionMessage>,
    shared: Arc<Shared>,
) {
    let mut uuid_tx = Some(uuid_tx);
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(tx) = uuid_tx.take() {
                    // First frame of the session is the plain-text UUID.
                    let _ = tx.send(text.trim().to_string());
                    continue;
                }
                let message = match serde_json::from_str::<TransactionMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unparseable transaction reply");
                        TransactionMessage {
                            kind: MessageKind::Error,
                            modeluri: String::new(),
                            data: None,
                        }
                    }
                };
                if reply_tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Unexpected binary frame on transaction socket, dropping");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Transaction socket read error");
                break;
            }
        }
    }
    shared.mark_closed();
}
