//! Gateway assembly
//!
//! Builds the axum application: a health probe, every plug-in's isolated
//! router mounted under the API prefix per the backstop policy, plug-in
//! middleware, and the reverse-proxy fallback for everything else.

use crate::config::GatewayConfig;
use crate::plugin::{GatewayPlugin, PluginContext};
use crate::{proxy, routes};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use modelgate_core::{GateError, Result};
use modelgate_transact::{
    CommandProviderRegistry, TransactionConfig, TransactionManager, TriggerProviderRegistry,
};
use modelgate_upstream::{UpstreamClient, UpstreamConfig};
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared by every gateway handler
#[derive(Clone)]
pub struct AppState {
    /// Typed client against the upstream server
    pub upstream: Arc<UpstreamClient>,
    /// Full paths that must never be forwarded to upstream
    pub backstop: Arc<HashSet<String>>,
}

/// The HTTP/WebSocket front door
pub struct Gateway {
    config: GatewayConfig,
    upstream: Arc<UpstreamClient>,
    manager: TransactionManager,
    plugins: Vec<Arc<dyn GatewayPlugin>>,
}

impl Gateway {
    /// Create a gateway against the given upstream
    pub fn new(
        config: GatewayConfig,
        upstream_config: UpstreamConfig,
        transaction_config: TransactionConfig,
    ) -> Result<Self> {
        let upstream = Arc::new(UpstreamClient::new(upstream_config)?);
        let manager = TransactionManager::new(
            upstream.clone(),
            CommandProviderRegistry::new(),
            TriggerProviderRegistry::new(),
            transaction_config,
        );
        Ok(Self {
            config,
            upstream,
            manager,
            plugins: Vec::new(),
        })
    }

    /// The transaction core; plug-ins register providers through it
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// The upstream client
    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    /// Register a plug-in; its routes are collected when the router is built
    pub fn register_plugin(&mut self, plugin: Arc<dyn GatewayPlugin>) {
        self.plugins.push(plugin);
    }

    /// Assemble the application router.
    ///
    /// Returns the router and the computed backstop set. Plug-in routes on
    /// standard paths stay with upstream unless their router claimed them;
    /// the first plug-in to claim a path wins, later claims are ignored.
    pub fn build_router(&self) -> (Router, HashSet<String>) {
        let ctx = PluginContext {
            manager: self.manager.clone(),
            upstream: self.upstream.clone(),
        };

        let mut backstop = HashSet::new();
        let mut app: Router<AppState> = Router::new().route("/health", get(health));

        for plugin in &self.plugins {
            let router_id = plugin.router_id().unwrap_or("<anonymous>").to_string();
            let mut plugin_router: Router<AppState> = Router::new();
            let mut mounted = 0usize;

            for entry in plugin.routes(&ctx) {
                let full_path = format!("{}{}", self.config.api_base, entry.path);
                if !routes::is_backstopped(&entry.path, plugin.forward_to_upstream()) {
                    tracing::debug!(
                        router_id = %router_id,
                        path = %full_path,
                        "Standard route left with upstream"
                    );
                    continue;
                }
                if backstop.contains(&full_path) {
                    tracing::warn!(
                        router_id = %router_id,
                        path = %full_path,
                        "Path already claimed by an earlier plug-in, ignoring"
                    );
                    continue;
                }
                backstop.insert(full_path.clone());
                plugin_router = plugin_router.route(&full_path, entry.handler);
                mounted += 1;
            }

            tracing::info!(router_id = %router_id, routes = mounted, "Mounted plug-in router");
            app = app.merge(plugin.router_layer(plugin_router));
        }

        for plugin in &self.plugins {
            app = plugin.app_layer(app);
        }

        let state = AppState {
            upstream: self.upstream.clone(),
            backstop: Arc::new(backstop.clone()),
        };
        let router = app
            .fallback(proxy::fallback)
            .layer(TraceLayer::new_for_http())
            .with_state(state);
        (router, backstop)
    }

    /// Bind the listener and serve until the shutdown future resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.listen_addr();
        let (router, backstop) = self.build_router();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| GateError::network(format!("failed to bind {addr}: {e}")))?;
        tracing::info!(
            addr = %addr,
            upstream = %self.upstream.config().authority(),
            backstopped_routes = backstop.len(),
            "Gateway listening"
        );
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GateError::network(format!("server error: {e}")))
    }
}

/// Local liveness probe; never forwarded
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
