//! WebSocket bridge
//!
//! Upgrade requests on paths no plug-in claimed are bridged to the same
//! path on upstream: text frames cross as text, binary as binary, and a
//! close on either side closes the other. The bridge is payload-agnostic;
//! subscription streams and anything else upstream speaks over WebSocket
//! pass through untouched.

use crate::gateway::AppState;
use axum::extract::ws::{Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accept the client upgrade and connect the matching upstream socket
pub fn bridge(ws: WebSocketUpgrade, state: AppState, path_and_query: String) -> Response {
    ws.on_upgrade(move |client| async move {
        let url = state.upstream.bridge_url(&path_and_query);
        match connect_async(&url).await {
            Ok((upstream, _response)) => {
                tracing::debug!(url = %url, "WebSocket bridge established");
                pump(client, upstream).await;
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "WebSocket bridge dial failed");
                // Dropping the client socket closes it; there is nothing to
                // bridge.
            }
        }
    })
}

/// Pipe frames in both directions until either side closes
async fn pump(client: WebSocket, upstream: UpstreamSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            frame = client_rx.next() => {
                match frame {
                    Some(Ok(message)) => {
                        let done = matches!(message, ClientMessage::Close(_));
                        if let Some(forward) = client_to_upstream(message) {
                            if upstream_tx.send(forward).await.is_err() {
                                break;
                            }
                        }
                        if done {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Client side of bridge errored");
                        let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                        break;
                    }
                    None => {
                        let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                        break;
                    }
                }
            }
            frame = upstream_rx.next() => {
                match frame {
                    Some(Ok(message)) => {
                        let done = matches!(message, UpstreamMessage::Close(_));
                        if let Some(forward) = upstream_to_client(message) {
                            if client_tx.send(forward).await.is_err() {
                                break;
                            }
                        }
                        if done {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Upstream side of bridge errored");
                        let _ = client_tx.send(ClientMessage::Close(None)).await;
                        break;
                    }
                    None => {
                        let _ = client_tx.send(ClientMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

fn client_to_upstream(message: ClientMessage) -> Option<UpstreamMessage> {
    match message {
        ClientMessage::Text(text) => Some(UpstreamMessage::Text(text)),
        ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ClientMessage::Ping(data) => Some(UpstreamMessage::Ping(data)),
        ClientMessage::Pong(data) => Some(UpstreamMessage::Pong(data)),
        ClientMessage::Close(_) => Some(UpstreamMessage::Close(None)),
    }
}

fn upstream_to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text)),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data)),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data)),
        UpstreamMessage::Close(_) => Some(ClientMessage::Close(None)),
        // Raw frames never surface from a read.
        UpstreamMessage::Frame(_) => None,
    }
}
