//! Upstream endpoint configuration

use std::time::Duration;

/// Where the upstream model server lives and how patient we are with it
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Hostname of the upstream server
    pub host: String,
    /// Port the upstream server listens on
    pub port: u16,
    /// Base URL path of the upstream API
    pub base_path: String,
    /// Connect timeout for HTTP and WebSocket dials
    pub connect_timeout: Duration,
    /// Per-request timeout for HTTP calls
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8081,
            base_path: "/api/v2".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamConfig {
    /// Authority part, `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// HTTP base URL including the API base path
    pub fn http_base(&self) -> String {
        format!("http://{}{}", self.authority(), self.base_path)
    }

    /// HTTP origin without the API base path, for verbatim forwarding
    pub fn http_origin(&self) -> String {
        format!("http://{}", self.authority())
    }

    /// WebSocket origin without the API base path
    pub fn ws_origin(&self) -> String {
        format!("ws://{}", self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_local_model_server() {
        let config = UpstreamConfig::default();
        assert_eq!(config.http_base(), "http://localhost:8081/api/v2");
        assert_eq!(config.ws_origin(), "ws://localhost:8081");
    }
}
