//! Per-query upstream forwarder
//!
//! Each inbound framed query gets its own ephemeral UDP socket: send the
//! opaque payload to the configured upstream resolver, await one datagram
//! under the per-query deadline, and push the framed reply onto the
//! session's writer queue. Failures drop the one query and never tear the
//! session down; the socket closes when the task ends.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace, warn};

use crate::error::ForwardError;
use crate::frame::{Frame, MAX_DATAGRAM_LEN};
use crate::sockopt;

/// Deadline for the upstream resolver's reply.
pub const UPSTREAM_DEADLINE: Duration = Duration::from_secs(1);

/// Relay one query to the upstream resolver and queue the framed reply.
pub(crate) async fn forward_query(
    frame: Frame,
    upstream: SocketAddr,
    writer_tx: mpsc::Sender<Message>,
) {
    let id = frame.id;
    match exchange(&frame.payload, upstream).await {
        Ok(reply) => {
            trace!(id, len = reply.len(), "upstream reply received");
            let reply_frame = Frame::new(id, reply);
            if writer_tx
                .send(Message::Binary(reply_frame.encode()))
                .await
                .is_err()
            {
                debug!(id, "session writer gone; dropping reply");
            }
        }
        Err(e) => {
            warn!(id, %upstream, error = %e, "upstream exchange failed; dropping query");
        }
    }
}

/// One UDP request/response exchange on a fresh ephemeral socket.
async fn exchange(payload: &[u8], upstream: SocketAddr) -> Result<Vec<u8>, ForwardError> {
    let std_socket = sockopt::upstream_socket(upstream).map_err(ForwardError::Socket)?;
    let socket = UdpSocket::from_std(std_socket).map_err(ForwardError::Socket)?;

    socket
        .send_to(payload, upstream)
        .await
        .map_err(|source| ForwardError::Send { upstream, source })?;

    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let (len, src) = timeout(UPSTREAM_DEADLINE, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ForwardError::Timeout { upstream })?
        .map_err(|source| ForwardError::Recv { upstream, source })?;

    if src != upstream {
        return Err(ForwardError::UnexpectedSource {
            got: src,
            expected: upstream,
        });
    }

    buf.truncate(len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    async fn canned_upstream(reply: &'static [u8]) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (_, peer) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(reply, peer).await.unwrap();
        });
        (addr, task)
    }

    #[tokio::test]
    async fn exchange_returns_upstream_bytes() {
        let (upstream, task) = canned_upstream(b"the-reply").await;
        let reply = exchange(b"the-query", upstream).await.unwrap();
        assert_eq!(reply, b"the-reply");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn exchange_times_out_on_silence() {
        // Bind a socket that never replies.
        let blackhole = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream = blackhole.local_addr().unwrap();

        let started = Instant::now();
        let result = exchange(b"query", upstream).await;
        assert!(matches!(result, Err(ForwardError::Timeout { .. })));
        assert!(started.elapsed() >= UPSTREAM_DEADLINE);
    }

    #[tokio::test]
    async fn forward_query_frames_reply_with_same_id() {
        let (upstream, _task) = canned_upstream(b"answer").await;
        let (tx, mut rx) = mpsc::channel(4);

        forward_query(Frame::new(0xDEAD_BEEF, b"question".to_vec()), upstream, tx).await;

        let message = rx.recv().await.unwrap();
        let frame = match message {
            Message::Binary(bytes) => Frame::decode(&bytes).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(frame.id, 0xDEAD_BEEF);
        assert_eq!(frame.payload, b"answer");
    }
}
