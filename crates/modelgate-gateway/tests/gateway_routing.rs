//! Routing, backstop, proxy, and bridge behavior against the mock upstream

use axum::extract::State;
use axum::http::HeaderValue;
use axum::middleware::{from_fn, Next};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use modelgate_gateway::{
    AppState, Gateway, GatewayConfig, GatewayPlugin, PluginContext, RouteEntry,
};
use modelgate_testkit::MockUpstream;
use modelgate_transact::TransactionConfig;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

/// Serve the gateway's router on an ephemeral port
async fn serve(gateway: &Gateway) -> SocketAddr {
    let (router, _backstop) = gateway.build_router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

fn gateway_for(mock: &MockUpstream) -> Gateway {
    Gateway::new(
        GatewayConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            ..GatewayConfig::default()
        },
        mock.config(),
        TransactionConfig::default(),
    )
    .expect("gateway")
}

struct FooPlugin;

impl GatewayPlugin for FooPlugin {
    fn router_id(&self) -> Option<&str> {
        Some("foo")
    }

    fn routes(&self, _ctx: &PluginContext) -> Vec<RouteEntry> {
        vec![
            RouteEntry::new("/foo", get(serve_foo)),
            // A standard route: stays with upstream under the default policy.
            RouteEntry::new("/models", get(serve_models_locally)),
        ]
    }

    fn router_layer(&self, router: Router<AppState>) -> Router<AppState> {
        router.layer(from_fn(tag_response))
    }
}

async fn serve_foo(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": "served locally" }))
}

async fn serve_models_locally(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": "models from plug-in" }))
}

async fn tag_response(
    request: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("x-plugin-router", HeaderValue::from_static("foo"));
    response
}

/// A plug-in that claims a standard route for itself
struct ClaimModels;

impl GatewayPlugin for ClaimModels {
    fn router_id(&self) -> Option<&str> {
        Some("claim-models")
    }

    fn forward_to_upstream(&self) -> Option<bool> {
        Some(false)
    }

    fn routes(&self, _ctx: &PluginContext) -> Vec<RouteEntry> {
        vec![RouteEntry::new("/models", get(serve_models_locally))]
    }
}

#[tokio::test]
async fn test_plugin_route_is_backstopped() {
    let mock = MockUpstream::spawn().await;
    let mut gateway = gateway_for(&mock);
    gateway.register_plugin(Arc::new(FooPlugin));
    let addr = serve(&gateway).await;

    let reply: Value = reqwest::get(format!("http://{addr}/api/v2/foo"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["data"], "served locally");
    assert!(
        mock.http_log().is_empty(),
        "backstopped path must not reach upstream: {:?}",
        mock.http_log()
    );
}

#[tokio::test]
async fn test_standard_route_is_forwarded_despite_plugin_handler() {
    let mock = MockUpstream::spawn().await;
    let mut gateway = gateway_for(&mock);
    gateway.register_plugin(Arc::new(FooPlugin));
    let addr = serve(&gateway).await;

    let reply: Value = reqwest::get(format!("http://{addr}/api/v2/models?modeluri=file:/m1"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["data"], "upstream");
    let log = mock.http_log();
    assert_eq!(log, vec!["GET /api/v2/models?modeluri=file:/m1".to_string()]);
}

#[tokio::test]
async fn test_explicitly_claimed_standard_route_is_served_locally() {
    let mock = MockUpstream::spawn().await;
    let mut gateway = gateway_for(&mock);
    gateway.register_plugin(Arc::new(ClaimModels));
    let addr = serve(&gateway).await;

    let reply: Value = reqwest::get(format!("http://{addr}/api/v2/models"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["data"], "models from plug-in");
    assert!(mock.http_log().is_empty());
}

#[tokio::test]
async fn test_plugin_router_middleware_wraps_its_routes() {
    let mock = MockUpstream::spawn().await;
    let mut gateway = gateway_for(&mock);
    gateway.register_plugin(Arc::new(FooPlugin));
    let addr = serve(&gateway).await;

    let response = reqwest::get(format!("http://{addr}/api/v2/foo"))
        .await
        .expect("request");
    assert_eq!(
        response.headers().get("x-plugin-router").map(|v| v.as_bytes()),
        Some(&b"foo"[..])
    );
}

#[tokio::test]
async fn test_unclaimed_paths_proxy_method_body_and_status() {
    let mock = MockUpstream::spawn().await;
    let gateway = gateway_for(&mock);
    let addr = serve(&gateway).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/api/v2/undo?modeluri=file:/m1"))
        .json(&json!({ "data": true }))
        .send()
        .await
        .expect("request");
    assert!(response.status().is_success());
    let reply: Value = response.json().await.expect("json");
    assert_eq!(reply["path"], "/api/v2/undo");

    let log = mock.http_log();
    assert_eq!(log, vec!["POST /api/v2/undo?modeluri=file:/m1".to_string()]);
}

#[tokio::test]
async fn test_health_is_served_locally() {
    let mock = MockUpstream::spawn().await;
    let gateway = gateway_for(&mock);
    let addr = serve(&gateway).await;

    let reply: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["status"], "ok");
    assert!(mock.http_log().is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream_surfaces_as_json_error() {
    let mock = MockUpstream::spawn().await;
    let gateway = gateway_for(&mock);
    let addr = serve(&gateway).await;
    // Kill the upstream before forwarding.
    drop(mock);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let response = reqwest::get(format!("http://{addr}/api/v2/models"))
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 500);
    let reply: Value = response.json().await.expect("json");
    assert!(reply["error"].as_str().is_some());
}

#[tokio::test]
async fn test_websocket_bridge_preserves_frame_kinds() {
    let mock = MockUpstream::spawn().await;
    let gateway = gateway_for(&mock);
    let addr = serve(&gateway).await;

    let (mut socket, _response) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/echo"))
            .await
            .expect("bridge connect");

    socket
        .send(Message::Text("hello".to_string()))
        .await
        .expect("send text");
    match socket.next().await {
        Some(Ok(Message::Text(text))) => assert_eq!(text, "hello"),
        other => panic!("expected text echo, got {other:?}"),
    }

    socket
        .send(Message::Binary(vec![1, 2, 3]))
        .await
        .expect("send binary");
    match socket.next().await {
        Some(Ok(Message::Binary(data))) => assert_eq!(data, vec![1, 2, 3]),
        other => panic!("expected binary echo, got {other:?}"),
    }

    // Closing our side closes the bridged upstream side too; the close
    // frame comes back.
    socket.send(Message::Close(None)).await.expect("close");
    loop {
        match socket.next().await {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
}
