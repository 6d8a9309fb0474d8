//! Upstream session: the single authenticated WebSocket to the server
//!
//! Lifecycle: dial the configured resolver URI, send the pre-shared token as
//! one TEXT message, then split the connection. A dedicated writer task
//! drains the outbound queue so concurrent queries can never interleave; the
//! reader loop demultiplexes response frames into the pending-query table.
//!
//! Any terminal reader event (cancellation, TEXT frame, close, transport
//! error) cancels all pending queries, requests a Normal-Closure close
//! through the writer, and initiates service shutdown.

use std::sync::Arc;

use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::pending::PendingTable;
use crate::error::SessionError;
use crate::frame::Frame;
use crate::shutdown::ShutdownSignal;
use crate::transport::{self, ResolverEndpoint, WsStream};
use crate::ws::{self, OUTBOUND_QUEUE_DEPTH};

/// A running upstream session.
pub struct UpstreamSession {
    writer_tx: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl UpstreamSession {
    /// Dial the resolver, authenticate, and start the session tasks.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the dial or the token send fails; both
    /// are fatal at startup.
    pub async fn establish(
        endpoint: &ResolverEndpoint,
        token: &str,
        pending: Arc<PendingTable>,
        shutdown: ShutdownSignal,
    ) -> Result<Self, SessionError> {
        let mut stream = transport::connect(endpoint).await?;

        // The very first message of a session is the TEXT auth token.
        stream
            .send(Message::Text(token.to_string()))
            .await
            .map_err(SessionError::AuthSend)?;
        info!(resolver = %endpoint.address_string(), "upstream session authenticated");

        let (sink, stream) = stream.split();
        let (writer_tx, writer_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let writer = tokio::spawn(ws::run_writer(sink, writer_rx));
        let reader = tokio::spawn(run_reader(
            stream,
            pending,
            shutdown,
            writer_tx.clone(),
        ));

        Ok(Self {
            writer_tx,
            reader,
            writer,
        })
    }

    /// Sender for outbound framed messages (cloned into each listener).
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.writer_tx.clone()
    }

    /// Hand over the session tasks for joining; drops this session's own
    /// queue handle so the writer can drain out once all listeners stop.
    #[must_use]
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        vec![self.reader, self.writer]
    }
}

async fn run_reader(
    mut stream: SplitStream<WsStream>,
    pending: Arc<PendingTable>,
    shutdown: ShutdownSignal,
    writer_tx: mpsc::Sender<Message>,
) {
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => match Frame::decode(&bytes) {
                    Ok(frame) => {
                        pending.complete(frame.id, frame.payload);
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed response frame");
                        break;
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Text(_))) => {
                    warn!("unexpected TEXT frame from server");
                    break;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "server closed the session");
                    break;
                }
                Some(Err(e)) => {
                    error!(error = %e, "upstream transport error");
                    break;
                }
                None => break,
            }
        }
    }

    // No response can arrive anymore; release every awaiter.
    pending.cancel_all();

    // Every teardown path closes with Normal Closure.
    if writer_tx.try_send(ws::close_message(CloseCode::Normal)).is_err() {
        debug!("writer queue unavailable for close message");
    }

    // Losing the session is terminal for the client service.
    shutdown.trigger();
}
