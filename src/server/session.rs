//! Per-connection session loop
//!
//! Reads framed queries off the WebSocket and spawns one forwarder per
//! frame so upstream latency never blocks the read loop. All writes back to
//! the peer go through the session's single writer task. The loop ends on
//! service stop, displacement, a protocol violation (TEXT frame or
//! malformed frame), peer close, or a transport error; teardown aborts
//! outstanding forwarders, performs the closing handshake, and removes the
//! session from the registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::forwarder::forward_query;
use super::registry::{SessionHandle, SessionRegistry};
use crate::frame::Frame;
use crate::shutdown::ShutdownSignal;
use crate::ws::{self, OUTBOUND_QUEUE_DEPTH};

/// Grace period for the writer to transmit the close message on teardown.
const WRITER_JOIN_DEADLINE: Duration = Duration::from_secs(2);

/// Run one authenticated session to completion.
pub(crate) async fn run_session(
    ws_stream: WebSocketStream<TcpStream>,
    handle: Arc<SessionHandle>,
    registry: Arc<SessionRegistry>,
    upstream: SocketAddr,
    shutdown: ShutdownSignal,
) {
    let peer = handle.peer();
    let (sink, mut stream) = ws_stream.split();
    let (writer_tx, writer_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let writer = tokio::spawn(ws::run_writer(sink, writer_rx));

    let mut stop = shutdown.subscribe();
    let mut cancel = handle.cancel_listener();
    let mut forwarders = JoinSet::new();

    info!(%peer, serial = handle.serial(), "session started");

    let close_code = loop {
        tokio::select! {
            _ = stop.recv() => {
                debug!(%peer, "service stopping; closing session");
                break CloseCode::Normal;
            }
            _ = cancel.recv() => {
                info!(%peer, serial = handle.serial(), "session displaced");
                break CloseCode::Normal;
            }
            Some(_) = forwarders.join_next(), if !forwarders.is_empty() => {}
            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => match Frame::decode(&bytes) {
                    Ok(frame) => {
                        forwarders.spawn(forward_query(frame, upstream, writer_tx.clone()));
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "malformed query frame");
                        break CloseCode::Protocol;
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Text(_))) => {
                    warn!(%peer, "unexpected TEXT frame after authentication");
                    break CloseCode::Protocol;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(%peer, ?frame, "peer closed the session");
                    break CloseCode::Normal;
                }
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "session transport error");
                    break CloseCode::Normal;
                }
                None => break CloseCode::Normal,
            }
        }
    };

    // Queue the close before dropping the writer handle so it goes out
    // after any already-queued replies.
    match timeout(
        Duration::from_millis(500),
        writer_tx.send(ws::close_message(close_code)),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(_)) | Err(_) => debug!(%peer, "could not queue close message"),
    }
    drop(writer_tx);

    forwarders.shutdown().await;
    if timeout(WRITER_JOIN_DEADLINE, writer).await.is_err() {
        warn!(%peer, "session writer did not stop in time");
    }

    registry.remove_if_current(handle.token(), handle.serial());
    info!(%peer, serial = handle.serial(), "session ended");
}
