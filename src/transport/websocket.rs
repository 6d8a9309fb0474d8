//! WebSocket dial implementation using tokio-tungstenite
//!
//! Supports plain WebSocket (`ws://`) and WebSocket over TLS (`wss://`).
//! TLS uses rustls with the Mozilla root store from `webpki-roots`; SNI is
//! taken from the endpoint host.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tracing::debug;

use super::{ResolverEndpoint, TransportError, WsStream};
use crate::ws;

/// Dial the resolver endpoint and complete the WebSocket upgrade.
///
/// Each resolved address is tried in order; the first successful handshake
/// wins. Every step (TCP connect, TLS handshake, WebSocket upgrade) runs
/// under the endpoint's connect timeout.
///
/// # Errors
///
/// Returns the last [`TransportError`] when every address fails, or a
/// resolution error when the host yields no addresses.
pub async fn connect(endpoint: &ResolverEndpoint) -> Result<WsStream, TransportError> {
    let addrs = resolve_address(&endpoint.host, endpoint.port)?;

    let mut last_error = None;
    for addr in addrs {
        let request = build_request(endpoint)?;
        let result = if endpoint.tls {
            connect_tls(addr, endpoint, request).await
        } else {
            connect_plain(addr, endpoint, request).await
        };

        match result {
            Ok(stream) => {
                debug!(
                    addr = %addr,
                    path = %endpoint.path,
                    tls = endpoint.tls,
                    "WebSocket connection established"
                );
                return Ok(stream);
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "connection attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        TransportError::connection_failed(endpoint.address_string(), "no addresses to connect to")
    }))
}

/// Resolve hostname to socket addresses.
fn resolve_address(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addr_str = format!("{host}:{port}");

    if let Ok(addr) = addr_str.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }

    let addrs: Vec<SocketAddr> = addr_str
        .to_socket_addrs()
        .map_err(|e| TransportError::dns_failed(&addr_str, e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::dns_failed(&addr_str, "no addresses returned"));
    }

    Ok(addrs)
}

/// Configure TCP socket options on the dialed stream.
fn configure_socket(stream: &TcpStream) -> Result<(), TransportError> {
    stream
        .set_nodelay(true)
        .map_err(|e| TransportError::socket_option("TCP_NODELAY", e.to_string()))?;

    let socket_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(20));

    #[cfg(target_os = "linux")]
    let keepalive = keepalive.with_retries(3);

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| TransportError::socket_option("TCP_KEEPALIVE", e.to_string()))?;

    Ok(())
}

/// Build the WebSocket upgrade request.
fn build_request(endpoint: &ResolverEndpoint) -> Result<Request<()>, TransportError> {
    let scheme = if endpoint.tls { "wss" } else { "ws" };
    let url = format!(
        "{scheme}://{}:{}{}",
        endpoint.host, endpoint.port, endpoint.path
    );

    Request::builder()
        .uri(&url)
        .header("Host", endpoint.host.as_str())
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .body(())
        .map_err(|e| TransportError::invalid_uri(&url, e.to_string()))
}

/// Create the rustls client configuration.
fn create_tls_config(endpoint: &ResolverEndpoint) -> rustls::ClientConfig {
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    /// Certificate verifier that accepts anything; test rigs only.
    #[derive(Debug)]
    struct InsecureServerCertVerifier;

    impl ServerCertVerifier for InsecureServerCertVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }

    if endpoint.insecure_skip_verify {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
            .with_no_client_auth()
    } else {
        let root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    }
}

/// Establish a TCP connection with the per-step deadline applied.
async fn dial_tcp(addr: SocketAddr, endpoint: &ResolverEndpoint) -> Result<TcpStream, TransportError> {
    let connect_timeout = endpoint.connect_timeout;
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            TransportError::timeout(format!("connect to {addr}"), connect_timeout.as_millis() as u64)
        })?
        .map_err(|e| TransportError::connection_failed(addr.to_string(), e.to_string()))?;
    configure_socket(&stream)?;
    Ok(stream)
}

async fn connect_plain(
    addr: SocketAddr,
    endpoint: &ResolverEndpoint,
    request: Request<()>,
) -> Result<WsStream, TransportError> {
    let tcp_stream = dial_tcp(addr, endpoint).await?;

    let ws_connect =
        tokio_tungstenite::client_async_with_config(request, tcp_stream, Some(ws::message_limits()));
    let (ws_stream, _response) = timeout(endpoint.connect_timeout, ws_connect)
        .await
        .map_err(|_| {
            TransportError::timeout(
                format!("WebSocket handshake with {addr}"),
                endpoint.connect_timeout.as_millis() as u64,
            )
        })?
        .map_err(|e| TransportError::websocket_handshake(e.to_string()))?;

    Ok(WsStream::Plain(ws_stream))
}

async fn connect_tls(
    addr: SocketAddr,
    endpoint: &ResolverEndpoint,
    request: Request<()>,
) -> Result<WsStream, TransportError> {
    let tcp_stream = dial_tcp(addr, endpoint).await?;

    let connector = TlsConnector::from(Arc::new(create_tls_config(endpoint)));
    let server_name: rustls::pki_types::ServerName<'static> = endpoint
        .host
        .clone()
        .try_into()
        .map_err(|_| TransportError::InvalidServerName(endpoint.host.clone()))?;

    let tls_stream = timeout(endpoint.connect_timeout, connector.connect(server_name, tcp_stream))
        .await
        .map_err(|_| {
            TransportError::timeout(
                format!("TLS handshake with {addr}"),
                endpoint.connect_timeout.as_millis() as u64,
            )
        })?
        .map_err(|e| TransportError::tls_handshake(&endpoint.host, e.to_string()))?;

    let ws_connect =
        tokio_tungstenite::client_async_with_config(request, tls_stream, Some(ws::message_limits()));
    let (ws_stream, _response) = timeout(endpoint.connect_timeout, ws_connect)
        .await
        .map_err(|_| {
            TransportError::timeout(
                format!("WebSocket handshake with {addr}"),
                endpoint.connect_timeout.as_millis() as u64,
            )
        })?
        .map_err(|e| TransportError::websocket_handshake(e.to_string()))?;

    Ok(WsStream::Tls(ws_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_plain() {
        let endpoint = ResolverEndpoint::parse("ws://dns.example.net/tunnel").unwrap();
        let request = build_request(&endpoint).unwrap();
        let uri = request.uri().to_string();
        assert!(uri.starts_with("ws://"));
        assert!(uri.contains("/tunnel"));
        assert!(request.headers().get("Sec-WebSocket-Key").is_some());
    }

    #[test]
    fn build_request_tls() {
        let endpoint = ResolverEndpoint::parse("wss://dns.example.net/").unwrap();
        let request = build_request(&endpoint).unwrap();
        assert!(request.uri().to_string().starts_with("wss://"));
        assert_eq!(
            request.headers().get("Host").unwrap().to_str().unwrap(),
            "dns.example.net"
        );
    }

    #[test]
    fn resolve_address_literal() {
        let addrs = resolve_address("127.0.0.1", 8080).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].port(), 8080);
    }

    #[tokio::test]
    async fn connect_refused() {
        // Port 1 on loopback should refuse quickly.
        let mut endpoint = ResolverEndpoint::parse("ws://127.0.0.1:1/").unwrap();
        endpoint.connect_timeout = Duration::from_millis(200);
        assert!(connect(&endpoint).await.is_err());
    }
}
