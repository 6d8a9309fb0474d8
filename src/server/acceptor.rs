//! WebSocket acceptor and authenticator
//!
//! Accepts TCP connections, upgrades them to WebSocket under a 1-second
//! deadline, and authenticates by the first message: it must be TEXT and
//! carry a configured token. Anything else is answered with the matching
//! close code (Protocol Error for a non-TEXT first message, Policy
//! Violation for an unknown token) and the connection is dropped.
//! Non-WebSocket HTTP requests fail the upgrade and are answered by the
//! handshake machinery before the connection closes.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use super::registry::{SessionHandle, SessionRegistry};
use super::session::run_session;
use crate::shutdown::ShutdownSignal;
use crate::ws;

/// Deadline for the WebSocket upgrade.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(1);

/// Deadline for the authentication message after the upgrade.
pub const AUTH_DEADLINE: Duration = Duration::from_secs(1);

/// Shared context for all accept loops.
pub(crate) struct AcceptorContext {
    pub registry: Arc<SessionRegistry>,
    pub tokens: HashSet<String>,
    pub upstream: SocketAddr,
    pub shutdown: ShutdownSignal,
}

/// Accept connections until shutdown.
pub(crate) async fn run_acceptor(listener: TcpListener, ctx: Arc<AcceptorContext>) {
    let local = listener.local_addr().ok();
    let mut stop = ctx.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = stop.recv() => {
                debug!(?local, "acceptor stopping");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "connection accepted");
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(handle_connection(stream, peer, ctx));
                }
                Err(e) => {
                    warn!(?local, error = %e, "accept failed");
                }
            }
        }
    }
}

/// Upgrade, authenticate, and admit one connection.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<AcceptorContext>) {
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        trace!(%peer, path = %request.uri().path(), "websocket upgrade requested");
        Ok(response)
    };

    let mut ws_stream = match timeout(
        HANDSHAKE_DEADLINE,
        tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(ws::message_limits()),
        ),
    )
    .await
    {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "websocket upgrade failed");
            return;
        }
        Err(_) => {
            debug!(%peer, "websocket upgrade timed out");
            return;
        }
    };

    // Exactly one message is expected before any framed traffic: the token.
    let token = match timeout(AUTH_DEADLINE, ws_stream.next()).await {
        Ok(Some(Ok(Message::Text(token)))) => token,
        Ok(Some(Ok(_))) => {
            debug!(%peer, "first message was not TEXT; rejecting");
            close_with(&mut ws_stream, CloseCode::Protocol).await;
            return;
        }
        Ok(Some(Err(e))) => {
            debug!(%peer, error = %e, "transport error during authentication");
            return;
        }
        Ok(None) => {
            debug!(%peer, "connection closed before authentication");
            return;
        }
        Err(_) => {
            debug!(%peer, "authentication timed out");
            close_with(&mut ws_stream, CloseCode::Normal).await;
            return;
        }
    };

    if !ctx.tokens.contains(&token) {
        warn!(%peer, "authentication rejected");
        close_with(&mut ws_stream, CloseCode::Policy).await;
        return;
    }

    info!(%peer, "session authenticated");
    let handle = Arc::new(SessionHandle::new(
        ctx.registry.next_serial(),
        token,
        peer,
    ));

    // Admit before running so the session's own end-hook always finds its
    // entry; the displaced predecessor is disposed before the new session
    // starts reading.
    if let Some(displaced) = ctx.registry.admit(Arc::clone(&handle)) {
        info!(
            %peer,
            prior_peer = %displaced.peer(),
            "displacing prior session for token"
        );
        displaced.dispose().await;
    }

    let task = tokio::spawn(run_session(
        ws_stream,
        Arc::clone(&handle),
        Arc::clone(&ctx.registry),
        ctx.upstream,
        ctx.shutdown.clone(),
    ));
    handle.attach_task(task).await;
}

/// Best-effort close with the given code.
async fn close_with(ws_stream: &mut WebSocketStream<TcpStream>, code: CloseCode) {
    let frame = CloseFrame {
        code,
        reason: "".into(),
    };
    if let Ok(Err(e)) = timeout(ws::CLOSE_DEADLINE, ws_stream.close(Some(frame))).await {
        debug!(error = %e, "close failed");
    }
}
