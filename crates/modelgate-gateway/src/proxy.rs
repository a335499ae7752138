//! Reverse proxy to upstream
//!
//! Fallback handler for every request no local route claimed: WebSocket
//! upgrades hand off to the bridge, backstopped paths are refused rather
//! than forwarded, and everything else goes to the corresponding path on
//! upstream with method, query, headers, and body preserved in both
//! directions.

use crate::bridge;
use crate::gateway::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// Forwarded request bodies are buffered; anything past this is refused
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe the connection rather than the request, never
/// forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Fallback for every path without a local route
pub async fn fallback(
    State(state): State<AppState>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    if let Some(ws) = ws {
        return bridge::bridge(ws, state, path_and_query);
    }

    // Backstopped paths are local-only. A request landing in the fallback
    // for one means no plug-in handler matched; it must still not leak to
    // upstream.
    if state.backstop.contains(request.uri().path()) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no handler for backstopped path" })),
        )
            .into_response();
    }

    forward(state, request, &path_and_query).await
}

async fn forward(state: AppState, request: Request, path_and_query: &str) -> Response {
    let (parts, body) = request.into_parts();
    let url = state.upstream.forward_url(path_and_query);

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return proxy_error(StatusCode::PAYLOAD_TOO_LARGE, format!("request body: {e}"))
        }
    };

    tracing::debug!(method = %parts.method, url = %url, "Forwarding to upstream");
    let result = state
        .upstream
        .http()
        .request(parts.method.clone(), &url)
        .headers(filter_headers(&parts.headers))
        .body(body)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Upstream unreachable");
            return proxy_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("could not reach upstream: {e}"),
            );
        }
    };

    let status = response.status();
    let headers = filter_headers(response.headers());
    match response.bytes().await {
        Ok(bytes) => {
            let mut reply = Response::builder().status(status);
            if let Some(reply_headers) = reply.headers_mut() {
                reply_headers.extend(headers);
            }
            reply
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => proxy_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("upstream body read failed: {e}"),
        ),
    }
}

fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn proxy_error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
