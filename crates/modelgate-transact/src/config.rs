//! Transaction coordination configuration

use std::time::Duration;

/// Timeouts and safety valves for one transaction session
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Timeout for dialing the transaction WebSocket
    pub connect_timeout: Duration,
    /// Timeout for the upstream to deliver the transaction UUID
    pub handshake_timeout: Duration,
    /// Timeout for the reply to a single `execute`
    pub reply_timeout: Duration,
    /// Upper bound on commit-time trigger rounds before the transaction is
    /// rolled back; triggers that never quiesce would otherwise loop forever
    pub max_trigger_rounds: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(30),
            max_trigger_rounds: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransactionConfig::default();
        assert_eq!(config.reply_timeout, Duration::from_secs(30));
        assert_eq!(config.max_trigger_rounds, 1000);
    }
}
