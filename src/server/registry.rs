//! Session registry: at most one live session per token
//!
//! Admitting a session for a token atomically swaps it into the map; the
//! displaced predecessor (if any) is returned to the caller for disposal
//! (cancel, join, transport close). A session that ends on its own removes
//! itself through [`SessionRegistry::remove_if_current`], which compares
//! serial numbers so a displaced session can never evict its successor.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::shutdown::{ShutdownListener, ShutdownSignal};

/// How long a disposal waits for the session task to finish. Covers one
/// select iteration plus the close-handshake deadline.
const DISPOSE_DEADLINE: Duration = Duration::from_secs(3);

/// One admitted session.
///
/// The handle carries the session's private cancellation signal and its task
/// handle; the transport itself is owned by the running session loop.
pub struct SessionHandle {
    serial: u64,
    token: String,
    peer: SocketAddr,
    cancel: ShutdownSignal,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub(crate) fn new(serial: u64, token: String, peer: SocketAddr) -> Self {
        Self {
            serial,
            token,
            peer,
            cancel: ShutdownSignal::new(),
            task: Mutex::new(None),
        }
    }

    /// Registry serial; higher serials displace lower ones.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The token this session authenticated with.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Remote peer address.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Listener on the session's private cancellation signal.
    pub(crate) fn cancel_listener(&self) -> ShutdownListener {
        self.cancel.subscribe()
    }

    /// Record the spawned session task for later joining.
    pub(crate) async fn attach_task(&self, task: JoinHandle<()>) {
        *self.task.lock().await = Some(task);
    }

    /// Cancel the session and join its task.
    ///
    /// Safe to call more than once; only the first caller joins the task.
    pub async fn dispose(&self) {
        self.cancel.trigger();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            match timeout(DISPOSE_DEADLINE, task).await {
                Ok(Ok(())) => debug!(serial = self.serial, peer = %self.peer, "session disposed"),
                Ok(Err(e)) => warn!(serial = self.serial, error = %e, "session task panicked"),
                Err(_) => warn!(serial = self.serial, "session task did not stop in time"),
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("serial", &self.serial)
            .field("peer", &self.peer)
            .finish()
    }
}

/// Counter snapshot for shutdown logging.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStatsSnapshot {
    pub admitted: u64,
    pub displaced: u64,
    pub active: usize,
}

/// token → current session mapping.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    next_serial: AtomicU64,
    admitted: AtomicU64,
    displaced: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_serial: AtomicU64::new(1),
            admitted: AtomicU64::new(0),
            displaced: AtomicU64::new(0),
        }
    }

    /// Allocate a serial for a new session.
    pub(crate) fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert `handle` as the current session for its token.
    ///
    /// Returns the displaced predecessor, which the caller must dispose.
    /// The map never holds two sessions for one token.
    pub fn admit(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        let displaced = self
            .sessions
            .insert(handle.token().to_string(), handle);
        if displaced.is_some() {
            self.displaced.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Remove the entry for `token` only if it still holds the session with
    /// `serial`. A no-op when the entry was already replaced.
    pub fn remove_if_current(&self, token: &str, serial: u64) -> bool {
        self.sessions
            .remove_if(token, |_, handle| handle.serial() == serial)
            .is_some()
    }

    /// Current session for `token`, if any.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(token).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and return every session; used on service shutdown.
    pub fn drain(&self) -> Vec<Arc<SessionHandle>> {
        let tokens: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tokens
            .into_iter()
            .filter_map(|token| self.sessions.remove(&token).map(|(_, handle)| handle))
            .collect()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            active: self.sessions.len(),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
