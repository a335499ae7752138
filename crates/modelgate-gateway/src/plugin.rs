//! Plug-in routing surface
//!
//! Each plug-in contributes handlers in its own isolated router, may wrap
//! that router (and the whole app) in middleware, and can reach the
//! transaction core through the [`PluginContext`] it receives when its
//! routes are collected.

use crate::gateway::AppState;
use axum::routing::MethodRouter;
use axum::Router;
use modelgate_transact::TransactionManager;
use modelgate_upstream::UpstreamClient;
use std::sync::Arc;

/// One route contributed by a plug-in, relative to the API prefix
pub struct RouteEntry {
    /// Path relative to the API prefix, e.g. `/foo`
    pub path: String,
    /// Handler(s) for the path
    pub handler: MethodRouter<AppState>,
}

impl RouteEntry {
    /// Contribute a handler at the given relative path
    pub fn new(path: impl Into<String>, handler: MethodRouter<AppState>) -> Self {
        Self {
            path: path.into(),
            handler,
        }
    }
}

/// Capabilities handed to plug-ins while the gateway assembles its router
#[derive(Clone)]
pub struct PluginContext {
    /// The transaction core; registries for command and trigger providers
    /// hang off of it
    pub manager: TransactionManager,
    /// Typed client against the upstream server
    pub upstream: Arc<UpstreamClient>,
}

/// A plug-in contributing routes and middleware to the gateway
pub trait GatewayPlugin: Send + Sync {
    /// Identifier used in logs
    fn router_id(&self) -> Option<&str> {
        None
    }

    /// Whether this plug-in's routes should still be forwarded to upstream.
    ///
    /// `None` applies the default policy: standard routes stay with
    /// upstream, everything else is served locally.
    fn forward_to_upstream(&self) -> Option<bool> {
        None
    }

    /// The routes this plug-in contributes
    fn routes(&self, ctx: &PluginContext) -> Vec<RouteEntry>;

    /// Wrap this plug-in's own router in middleware
    fn router_layer(&self, router: Router<AppState>) -> Router<AppState> {
        router
    }

    /// Wrap the assembled app in middleware
    fn app_layer(&self, router: Router<AppState>) -> Router<AppState> {
        router
    }
}
