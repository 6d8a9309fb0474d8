//! Client-side transport: dialing the resolver WebSocket
//!
//! The client maintains exactly one connection to the relay server,
//! described by a [`ResolverEndpoint`] parsed from the configured `ws://` or
//! `wss://` URI. [`connect`] establishes the TCP connection, performs the
//! TLS handshake when the scheme demands it, and completes the WebSocket
//! upgrade, each step under the endpoint's connect timeout.
//!
//! The resulting [`WsStream`] is used in message mode (no byte-stream
//! wrapper): the session layer sends and receives whole WebSocket messages.

mod error;
mod websocket;

pub use error::TransportError;
pub use websocket::connect;

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::sink::Sink;
use futures::stream::Stream;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::ws::WsError;

/// Default deadline for each dial step (TCP, TLS, WebSocket upgrade).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed resolver endpoint.
#[derive(Debug, Clone)]
pub struct ResolverEndpoint {
    /// Remote host (name or IP literal).
    pub host: String,

    /// Remote port.
    pub port: u16,

    /// Request path, always starting with `/`.
    pub path: String,

    /// Whether to wrap the connection in TLS (`wss://`).
    pub tls: bool,

    /// Per-step dial deadline.
    pub connect_timeout: Duration,

    /// Skip TLS certificate verification. Only for test rigs with
    /// self-signed certificates; never enabled from configuration.
    pub insecure_skip_verify: bool,
}

impl ResolverEndpoint {
    /// Parse a `ws://` or `wss://` URI.
    ///
    /// The port defaults to 80 for `ws://` and 443 for `wss://`; the path
    /// defaults to `/`. IPv6 hosts use bracket notation
    /// (`wss://[::1]:4443/`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUri`] when the scheme is unknown or
    /// the authority is malformed.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let (tls, rest) = if let Some(rest) = uri.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = uri.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(TransportError::invalid_uri(
                uri,
                "scheme must be ws:// or wss://",
            ));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };
        if authority.is_empty() {
            return Err(TransportError::invalid_uri(uri, "missing host"));
        }

        let default_port = if tls { 443 } else { 80 };
        let (host, port) = split_authority(authority)
            .map_err(|reason| TransportError::invalid_uri(uri, reason))?;

        Ok(Self {
            host,
            port: port.unwrap_or(default_port),
            path,
            tls,
            connect_timeout: CONNECT_TIMEOUT,
            insecure_skip_verify: false,
        })
    }

    /// The `host:port` string for logging and resolution.
    #[must_use]
    pub fn address_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
fn split_authority(authority: &str) -> Result<(String, Option<u16>), String> {
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest.find(']').ok_or("unterminated IPv6 literal")?;
        let host = rest[..end].to_string();
        let tail = &rest[end + 1..];
        if tail.is_empty() {
            return Ok((host, None));
        }
        let port = tail
            .strip_prefix(':')
            .ok_or("expected ':' after IPv6 literal")?
            .parse::<u16>()
            .map_err(|e| format!("invalid port: {e}"))?;
        return Ok((host, Some(port)));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err("missing host".into());
            }
            let port = port.parse::<u16>().map_err(|e| format!("invalid port: {e}"))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}

/// An established WebSocket connection, plain or TLS.
///
/// Delegates `Stream` and `Sink` to the inner connection so the session
/// layer can split it without caring about the TLS wrapping.
pub enum WsStream {
    Plain(WebSocketStream<TcpStream>),
    Tls(WebSocketStream<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl std::fmt::Debug for WsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("WsStream::Plain"),
            Self::Tls(_) => f.write_str("WsStream::Tls"),
        }
    }
}

impl Stream for WsStream {
    type Item = Result<Message, WsError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_next(cx),
            Self::Tls(stream) => Pin::new(stream).poll_next(cx),
        }
    }
}

impl Sink<Message> for WsStream {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_ready(cx),
            Self::Tls(stream) => Pin::new(stream).poll_ready(cx),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).start_send(item),
            Self::Tls(stream) => Pin::new(stream).start_send(item),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_close(cx),
            Self::Tls(stream) => Pin::new(stream).poll_close(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_wss_defaults() {
        let ep = ResolverEndpoint::parse("wss://dns.example.net/tunnel").unwrap();
        assert!(ep.tls);
        assert_eq!(ep.host, "dns.example.net");
        assert_eq!(ep.port, 443);
        assert_eq!(ep.path, "/tunnel");
    }

    #[test]
    fn parse_ws_with_port() {
        let ep = ResolverEndpoint::parse("ws://127.0.0.1:9000").unwrap();
        assert!(!ep.tls);
        assert_eq!(ep.port, 9000);
        assert_eq!(ep.path, "/");
    }

    #[test]
    fn parse_ipv6_literal() {
        let ep = ResolverEndpoint::parse("wss://[::1]:4443/t").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 4443);
        assert_eq!(ep.path, "/t");
    }

    #[test]
    fn parse_rejects_unknown_scheme() {
        assert!(ResolverEndpoint::parse("https://dns.example.net/").is_err());
        assert!(ResolverEndpoint::parse("dns.example.net:443").is_err());
    }

    #[test]
    fn parse_rejects_bad_authority() {
        assert!(ResolverEndpoint::parse("wss:///path").is_err());
        assert!(ResolverEndpoint::parse("wss://host:notaport/").is_err());
        assert!(ResolverEndpoint::parse("wss://[::1/").is_err());
    }
}
