//! Server service lifecycle
//!
//! Binds the configured URLs, runs one accept loop per bind, and owns the
//! shutdown sequence: trigger → acceptors stop → every live session closes
//! with Normal Closure and removes itself → stragglers are disposed from
//! the registry → accept tasks are joined.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::acceptor::{run_acceptor, AcceptorContext};
use super::registry::SessionRegistry;
use crate::config::ServerConfig;
use crate::error::{DnsveilError, ListenerError};
use crate::shutdown::ShutdownSignal;

/// A started server service.
pub struct ServerService {
    local_addrs: Vec<SocketAddr>,
    registry: Arc<SessionRegistry>,
    shutdown: ShutdownSignal,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl ServerService {
    /// Bind the configured URLs and start accepting sessions.
    ///
    /// # Errors
    ///
    /// Configuration problems and bind failures are fatal at startup.
    pub async fn start(config: &ServerConfig) -> Result<Self, DnsveilError> {
        config.validate()?;
        let upstream = config.upstream_addr()?;
        let tokens: HashSet<String> = config.auth_token.iter().cloned().collect();

        let mut listeners = Vec::new();
        let mut local_addrs = Vec::new();
        for addr in config.bind_addrs()? {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| ListenerError::bind(addr, e))?;
            let local = listener
                .local_addr()
                .map_err(|e| ListenerError::bind(addr, e))?;
            info!(addr = %local, "listening for WebSocket upgrades");
            local_addrs.push(local);
            listeners.push(listener);
        }

        let registry = Arc::new(SessionRegistry::new());
        let shutdown = ShutdownSignal::new();
        let ctx = Arc::new(AcceptorContext {
            registry: Arc::clone(&registry),
            tokens,
            upstream,
            shutdown: shutdown.clone(),
        });

        let accept_tasks = listeners
            .into_iter()
            .map(|listener| tokio::spawn(run_acceptor(listener, Arc::clone(&ctx))))
            .collect();

        info!(%upstream, "server service started");
        Ok(Self {
            local_addrs,
            registry,
            shutdown,
            accept_tasks,
        })
    }

    /// Actual bound addresses (resolves port 0 binds).
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Cloneable shutdown handle for external triggers.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Trigger shutdown and wait for every task and session to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Wait for the service to finish (after a trigger from any source).
    pub async fn join(self) {
        for task in self.accept_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "accept task ended abnormally");
            }
        }
        // Sessions remove themselves on stop; dispose whatever is left so
        // their tasks are joined before we return.
        for handle in self.registry.drain() {
            handle.dispose().await;
        }
        let stats = self.registry.stats();
        info!(
            admitted = stats.admitted,
            displaced = stats.displaced,
            "server service stopped"
        );
    }
}
