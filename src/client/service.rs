//! Client service lifecycle
//!
//! Wires the listener pool, pending-query table, and upstream session
//! together and owns the shutdown sequence: trigger → listeners stop →
//! session reader cancels outstanding queries and requests Normal Closure →
//! writer drains and closes the transport → all tasks are joined.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::listener::UdpListenerPool;
use super::pending::PendingTable;
use super::session::UpstreamSession;
use crate::config::ClientConfig;
use crate::error::DnsveilError;
use crate::shutdown::ShutdownSignal;
use crate::transport::ResolverEndpoint;

/// A started client service.
pub struct ClientService {
    local_addrs: Vec<SocketAddr>,
    pending: Arc<PendingTable>,
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientService {
    /// Bind the endpoints, establish the upstream session, and start all
    /// tasks.
    ///
    /// # Errors
    ///
    /// Configuration problems, bind failures, and an unreachable resolver
    /// are all fatal at startup.
    pub async fn start(config: &ClientConfig) -> Result<Self, DnsveilError> {
        config.validate()?;
        let endpoint = ResolverEndpoint::parse(&config.resolver)?;
        let addrs = config.endpoint_addrs()?;

        let pool = UdpListenerPool::bind(&addrs)?;
        let local_addrs = pool.local_addrs();

        let shutdown = ShutdownSignal::new();
        let pending = Arc::new(PendingTable::new());

        let session = UpstreamSession::establish(
            &endpoint,
            &config.resolver_auth_token,
            Arc::clone(&pending),
            shutdown.clone(),
        )
        .await?;

        let mut tasks = pool.spawn(Arc::clone(&pending), session.sender(), shutdown.clone());
        tasks.extend(session.into_tasks());

        info!(endpoints = ?local_addrs, "client service started");
        Ok(Self {
            local_addrs,
            pending,
            shutdown,
            tasks,
        })
    }

    /// Actual bound UDP endpoints.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Number of queries currently in flight.
    #[must_use]
    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    /// Cloneable shutdown handle for external triggers (signals, self-test).
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Trigger shutdown and wait for every task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Wait for the service to finish (after a trigger from any source).
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "service task ended abnormally");
            }
        }
        let stats = self.pending.stats();
        info!(
            registered = stats.registered,
            completed = stats.completed,
            expired = stats.expired,
            cancelled = stats.cancelled,
            late_dropped = stats.late_dropped,
            "client service stopped"
        );
    }
}
