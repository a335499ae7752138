//! Unified error system for modelgate
//!
//! A single error type shared by every crate in the workspace. Variants map
//! to the failure classes of the gateway: wire-level trouble with the
//! upstream server, transaction protocol violations, and plug-in supplied
//! edit logic that reported failure.

use serde::{Deserialize, Serialize};

/// Unified error type for all modelgate operations
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum GateError {
    /// Operation attempted on a transaction whose socket already closed
    #[error("Socket closed: {message}")]
    SocketClosed {
        /// What was attempted on the closed socket
        message: String,
    },

    /// Upstream answered with a non-2xx status or a protocol-level failure
    #[error("Upstream error ({status}): {body}")]
    Upstream {
        /// HTTP status code reported by upstream
        status: u16,
        /// Response body, preserved verbatim for the caller
        body: String,
    },

    /// Network or transport error reaching upstream
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// A command provider's transaction function reported failure
    #[error("Command execution failed: {message}")]
    CommandFailed {
        /// Which command or provider failed
        message: String,
    },

    /// A trigger step rejected during commit
    #[error("Trigger execution failed: {message}")]
    TriggerFailed {
        /// Which trigger step failed
        message: String,
    },

    /// Malformed or unexpected message on the transaction socket
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message describing the protocol violation
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Timed out: {message}")]
    Timeout {
        /// Which operation timed out
        message: String,
    },

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl GateError {
    /// Create a socket-closed error
    pub fn socket_closed(message: impl Into<String>) -> Self {
        Self::SocketClosed {
            message: message.into(),
        }
    }

    /// Create an upstream error from a status and body
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a command-failed error
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Create a trigger-failed error
    pub fn trigger_failed(message: impl Into<String>) -> Self {
        Self::TriggerFailed {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the failure indicates the transaction socket is unusable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SocketClosed { .. } | Self::Network { .. })
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::SocketClosed { .. } => "socket_closed",
            Self::Upstream { .. } => "upstream",
            Self::Network { .. } => "network",
            Self::CommandFailed { .. } => "command_failed",
            Self::TriggerFailed { .. } => "trigger_failed",
            Self::Protocol { .. } => "protocol",
            Self::Timeout { .. } => "timeout",
            Self::Invalid { .. } => "invalid",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Standard Result type for modelgate operations
pub type Result<T> = std::result::Result<T, GateError>;

// Conversion traits for common error types
impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<url::ParseError> for GateError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid(format!("URL parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GateError::socket_closed("execute after close");
        assert!(matches!(err, GateError::SocketClosed { .. }));
        assert_eq!(err.to_string(), "Socket closed: execute after close");
    }

    #[test]
    fn test_upstream_error_preserves_status_and_body() {
        let err = GateError::upstream(404, "no such model");
        assert_eq!(err.to_string(), "Upstream error (404): no such model");
        assert_eq!(err.category(), "upstream");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = GateError::from(json_err);
        assert!(matches!(err, GateError::Serialization { .. }));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(GateError::socket_closed("x").is_terminal());
        assert!(!GateError::command_failed("x").is_terminal());
    }
}
