//! Gateway listener configuration

/// Where the gateway listens and which API prefix it serves
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address for the listener
    pub bind_addr: String,
    /// Port to listen on
    pub port: u16,
    /// API prefix shared with upstream, e.g. `/api/v2`
    pub api_base: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8082,
            api_base: "/api/v2".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Socket address string for binding
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
