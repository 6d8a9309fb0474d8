//! Transport-layer error types

use thiserror::Error;

/// Errors raised while dialing the resolver WebSocket.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The resolver URI could not be parsed
    #[error("invalid resolver URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// DNS resolution of the resolver host failed
    #[error("failed to resolve {address}: {reason}")]
    DnsFailed { address: String, reason: String },

    /// TCP connection failed
    #[error("failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Failed to apply a TCP socket option
    #[error("failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// The resolver host is not a valid TLS server name
    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),

    /// TLS handshake failed
    #[error("TLS handshake with {server_name} failed: {reason}")]
    TlsHandshake { server_name: String, reason: String },

    /// WebSocket handshake failed
    #[error("WebSocket handshake failed: {0}")]
    WebSocketHandshake(String),
}

impl TransportError {
    /// Create an invalid-URI error.
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a DNS resolution error.
    pub fn dns_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DnsFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failure error.
    pub fn connection_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a socket option error.
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a TLS handshake error.
    pub fn tls_handshake(server_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TlsHandshake {
            server_name: server_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a WebSocket handshake error.
    pub fn websocket_handshake(reason: impl Into<String>) -> Self {
        Self::WebSocketHandshake(reason.into())
    }
}
