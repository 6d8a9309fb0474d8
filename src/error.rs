//! Error types for dnsveil
//!
//! Errors are categorized by subsystem. Startup failures (configuration,
//! binding, the initial upstream dial) are fatal and bubble up to the binary
//! mains; per-query failures are logged at their call sites and drop the one
//! query without surfacing an error.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::TransportError;
use crate::ws::WsError;

/// Top-level error type for dnsveil.
#[derive(Debug, Error)]
pub enum DnsveilError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client-side transport dial errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// UDP listener pool errors
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    /// WebSocket session errors
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Upstream forwarding errors
    #[error("forward error: {0}")]
    Forward(#[from] ForwardError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Validation error (invalid values, missing required fields)
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// Environment variable override error
    #[error("environment variable {name}: {reason}")]
    Env { name: String, reason: String },

    /// I/O error while reading the file
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Create an environment variable error.
    pub fn env(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// UDP listener pool errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind a configured endpoint
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Failed to apply a socket option during setup
    #[error("failed to set socket option {option} on {addr}: {source}")]
    SocketOption {
        option: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No endpoints were configured
    #[error("listener pool has no endpoints")]
    Empty,
}

impl ListenerError {
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { addr, source }
    }
}

/// WebSocket session errors (client side; server-side session failures are
/// logged and end the session without propagating).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Dial failed (TCP, TLS, or WebSocket handshake)
    #[error("failed to reach resolver: {0}")]
    Connect(#[from] TransportError),

    /// The authentication token could not be sent
    #[error("failed to send authentication token: {0}")]
    AuthSend(#[source] WsError),
}

/// Per-query upstream forwarding errors (server side). These drop the one
/// query and never tear the session down.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Ephemeral socket creation or option setup failed
    #[error("failed to prepare upstream socket: {0}")]
    Socket(#[source] io::Error),

    /// Sending the query datagram failed
    #[error("failed to send query to upstream {upstream}: {source}")]
    Send {
        upstream: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Receiving the reply datagram failed
    #[error("failed to receive reply from upstream {upstream}: {source}")]
    Recv {
        upstream: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No reply arrived within the per-query deadline
    #[error("upstream {upstream} did not reply in time")]
    Timeout { upstream: SocketAddr },

    /// A datagram arrived from an address other than the upstream
    #[error("reply from unexpected source {got} (expected {expected})")]
    UnexpectedSource {
        got: SocketAddr,
        expected: SocketAddr,
    },
}
