//! Modelgate Gateway
//!
//! The HTTP/WebSocket front door of the intermediary. Plug-ins contribute
//! isolated routers under the API prefix; everything they do not claim is
//! reverse-proxied to the upstream model server, and WebSocket upgrades on
//! unclaimed paths are bridged through bidirectionally. The backstop set
//! records exactly which paths must never reach upstream.

#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod gateway;
pub mod plugin;
pub mod proxy;
pub mod routes;

pub use config::GatewayConfig;
pub use gateway::{AppState, Gateway};
pub use plugin::{GatewayPlugin, PluginContext, RouteEntry};
pub use routes::STANDARD_ROUTES;
