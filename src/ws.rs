//! Shared WebSocket plumbing for both tunnel endpoints
//!
//! Both the client session and every server session funnel their outbound
//! traffic through a single writer task so concurrent queries can never
//! interleave bytes within one WebSocket message. The writer drains an mpsc
//! queue, stops after it has transmitted a Close message, and always
//! attempts a graceful close of the sink under its own deadline, independent
//! of any cancellation.

use std::time::Duration;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tracing::{debug, trace};

use crate::frame::MAX_FRAME_LEN;

/// WebSocket-level error type.
pub type WsError = tokio_tungstenite::tungstenite::Error;

/// Depth of the per-session outbound queue.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Deadline for the closing handshake on teardown.
pub const CLOSE_DEADLINE: Duration = Duration::from_secs(1);

/// WebSocket configuration bounding message sizes to one framed message.
#[must_use]
pub fn message_limits() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_LEN);
    config.max_frame_size = Some(MAX_FRAME_LEN);
    config
}

/// Build a Close message with the given code and an empty reason.
#[must_use]
pub fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: "".into(),
    }))
}

/// Drain the outbound queue into the WebSocket sink.
///
/// Runs until the queue closes, a send fails, or a Close message has been
/// transmitted, then performs the closing handshake with [`CLOSE_DEADLINE`].
pub async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Message>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "websocket send failed; stopping writer");
            break;
        }
        if closing {
            trace!("close message transmitted");
            break;
        }
    }
    rx.close();
    match timeout(CLOSE_DEADLINE, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "websocket close failed"),
        Err(_) => debug!("websocket close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_bound_message_and_frame_size() {
        let config = message_limits();
        assert_eq!(config.max_message_size, Some(MAX_FRAME_LEN));
        assert_eq!(config.max_frame_size, Some(MAX_FRAME_LEN));
    }

    #[test]
    fn close_message_carries_code() {
        match close_message(CloseCode::Policy) {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
