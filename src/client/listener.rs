//! UDP listener pool
//!
//! One receive loop per configured bind address. Each datagram is registered
//! in the pending-query table, framed, and handed to the session writer; a
//! small reply task per query awaits the outcome and writes the response
//! datagram back to the originating source.
//!
//! Transient receive errors keep the loop alive. A permanent socket failure
//! removes the listener from the pool; when the pool empties while the
//! service is running, the whole service shuts down.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, trace, warn};

use super::pending::{PendingTable, QueryOutcome, QUERY_DEADLINE};
use crate::error::ListenerError;
use crate::frame::{Frame, MAX_DATAGRAM_LEN};
use crate::shutdown::ShutdownSignal;
use crate::sockopt;

/// Grace period for reply tasks to drain when a listener loop exits.
const REPLY_DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// The set of bound listener sockets.
pub struct UdpListenerPool {
    sockets: Vec<Arc<UdpSocket>>,
}

impl UdpListenerPool {
    /// Bind every configured endpoint.
    ///
    /// # Errors
    ///
    /// Any bind failure is fatal and aborts startup.
    pub fn bind(addrs: &[SocketAddr]) -> Result<Self, ListenerError> {
        if addrs.is_empty() {
            return Err(ListenerError::Empty);
        }

        let mut sockets = Vec::with_capacity(addrs.len());
        for &addr in addrs {
            let std_socket =
                sockopt::listener_socket(addr).map_err(|e| ListenerError::bind(addr, e))?;
            let socket =
                UdpSocket::from_std(std_socket).map_err(|e| ListenerError::bind(addr, e))?;
            let local = socket.local_addr().map_err(|e| ListenerError::bind(addr, e))?;
            info!(addr = %local, "UDP endpoint bound");
            sockets.push(Arc::new(socket));
        }
        Ok(Self { sockets })
    }

    /// Actual bound addresses (resolves port 0 binds).
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets
            .iter()
            .filter_map(|s| s.local_addr().ok())
            .collect()
    }

    /// Spawn one receive loop per socket.
    ///
    /// The returned handles complete when their loops exit. When the last
    /// listener dies on a permanent socket error, `shutdown` is triggered.
    pub fn spawn(
        self,
        pending: Arc<PendingTable>,
        writer_tx: mpsc::Sender<Message>,
        shutdown: ShutdownSignal,
    ) -> Vec<JoinHandle<()>> {
        let live = Arc::new(AtomicUsize::new(self.sockets.len()));
        self.sockets
            .into_iter()
            .map(|socket| {
                tokio::spawn(run_listener(
                    socket,
                    Arc::clone(&pending),
                    writer_tx.clone(),
                    shutdown.clone(),
                    Arc::clone(&live),
                ))
            })
            .collect()
    }
}

async fn run_listener(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingTable>,
    writer_tx: mpsc::Sender<Message>,
    shutdown: ShutdownSignal,
    live: Arc<AtomicUsize>,
) {
    let addr = socket.local_addr().ok();
    let mut stop = shutdown.subscribe();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let mut repliers = JoinSet::new();

    let failed = loop {
        tokio::select! {
            _ = stop.recv() => {
                debug!(?addr, "listener stopping");
                break false;
            }
            Some(_) = repliers.join_next(), if !repliers.is_empty() => {}
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    handle_datagram(
                        &socket,
                        &pending,
                        &writer_tx,
                        &mut repliers,
                        &buf[..len],
                        source,
                    )
                    .await;
                }
                Err(e) if is_transient_recv_error(&e) => {
                    warn!(?addr, error = %e, "transient receive error");
                }
                Err(e) => {
                    error!(?addr, error = %e, "listener socket failed; removing from pool");
                    break true;
                }
            }
        }
    };

    // Let in-flight reply tasks resolve; each is bounded by the query
    // deadline anyway.
    let drained = timeout(REPLY_DRAIN_DEADLINE, async {
        while repliers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        repliers.shutdown().await;
    }

    if failed && live.fetch_sub(1, Ordering::AcqRel) == 1 {
        warn!("listener pool is empty; initiating service shutdown");
        shutdown.trigger();
    }
}

async fn handle_datagram(
    socket: &Arc<UdpSocket>,
    pending: &Arc<PendingTable>,
    writer_tx: &mpsc::Sender<Message>,
    repliers: &mut JoinSet<()>,
    datagram: &[u8],
    source: SocketAddr,
) {
    let (id, rx) = pending.register(source);
    let frame = Frame::new(id, datagram.to_vec());

    if writer_tx.send(Message::Binary(frame.encode())).await.is_err() {
        debug!(id, %source, "session writer gone; dropping query");
        pending.expire(id);
        return;
    }

    let socket = Arc::clone(socket);
    let pending = Arc::clone(pending);
    repliers.spawn(async move {
        match timeout(QUERY_DEADLINE, rx).await {
            Ok(Ok(QueryOutcome::Response(payload))) => {
                // Reply only to the address recorded at registration.
                if let Err(e) = socket.send_to(&payload, source).await {
                    warn!(id, %source, error = %e, "failed to send UDP reply");
                } else {
                    trace!(id, %source, len = payload.len(), "UDP reply sent");
                }
            }
            Ok(Ok(QueryOutcome::Cancelled)) => {
                debug!(id, %source, "query cancelled before a response arrived");
            }
            Ok(Err(_)) => {
                // Table dropped the sender; nothing to deliver.
            }
            Err(_) => {
                pending.expire(id);
                debug!(id, %source, "query deadline elapsed");
            }
        }
    });
}

/// Errors that keep the receive loop alive.
fn is_transient_recv_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_empty_pool() {
        assert!(matches!(
            UdpListenerPool::bind(&[]),
            Err(ListenerError::Empty)
        ));
    }

    #[tokio::test]
    async fn bind_reports_local_addrs() {
        let pool = UdpListenerPool::bind(&["127.0.0.1:0".parse().unwrap()]).unwrap();
        let addrs = pool.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
    }

    #[tokio::test]
    async fn datagram_flows_to_writer_and_reply_returns() {
        let pool = UdpListenerPool::bind(&["127.0.0.1:0".parse().unwrap()]).unwrap();
        let endpoint = pool.local_addrs()[0];
        let pending = Arc::new(PendingTable::new());
        let shutdown = ShutdownSignal::new();
        let (writer_tx, mut writer_rx) = mpsc::channel(16);

        let tasks = pool.spawn(Arc::clone(&pending), writer_tx, shutdown.clone());

        let stub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stub.send_to(b"query-bytes", endpoint).await.unwrap();

        // The listener must have framed the datagram onto the writer queue.
        let message = timeout(Duration::from_secs(1), writer_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame = match message {
            Message::Binary(bytes) => Frame::decode(&bytes).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(frame.payload, b"query-bytes");
        assert_eq!(pending.len(), 1);

        // Completing the slot sends the reply datagram back to the stub.
        assert!(pending.complete(frame.id, b"reply-bytes".to_vec()));
        let mut buf = [0u8; 64];
        let (len, from) = timeout(Duration::from_secs(1), stub.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"reply-bytes");
        assert_eq!(from, endpoint);

        shutdown.trigger();
        for task in tasks {
            timeout(Duration::from_secs(3), task).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn unanswered_query_expires() {
        let pool = UdpListenerPool::bind(&["127.0.0.1:0".parse().unwrap()]).unwrap();
        let endpoint = pool.local_addrs()[0];
        let pending = Arc::new(PendingTable::new());
        let shutdown = ShutdownSignal::new();
        let (writer_tx, mut writer_rx) = mpsc::channel(16);

        let _tasks = pool.spawn(Arc::clone(&pending), writer_tx, shutdown.clone());

        let stub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stub.send_to(b"no-answer", endpoint).await.unwrap();
        let _ = writer_rx.recv().await.unwrap();
        assert_eq!(pending.len(), 1);

        tokio::time::sleep(QUERY_DEADLINE + Duration::from_millis(50)).await;
        assert_eq!(pending.len(), 0);
        assert_eq!(pending.stats().expired, 1);
        shutdown.trigger();
    }
}
