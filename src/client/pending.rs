//! Pending-query table
//!
//! Owns the correlation-id namespace and the set of in-flight queries. Each
//! registered query holds the UDP source address it must be answered to and
//! a one-shot slot its handler awaits. Ids are unique among concurrently
//! pending queries; reuse after a slot resolves or expires is fine.
//!
//! Completing an id that is no longer present is a silent no-op (the query
//! expired or was cancelled); such late frames are counted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Response deadline for one pending query, measured from registration.
pub const QUERY_DEADLINE: Duration = Duration::from_secs(1);

/// How a pending query resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The framed response payload arrived in time.
    Response(Vec<u8>),
    /// The session was torn down before a response arrived.
    Cancelled,
}

struct PendingSlot {
    source: SocketAddr,
    registered_at: Instant,
    tx: oneshot::Sender<QueryOutcome>,
}

#[derive(Debug, Default)]
struct PendingStats {
    registered: AtomicU64,
    completed: AtomicU64,
    expired: AtomicU64,
    cancelled: AtomicU64,
    late_dropped: AtomicU64,
}

/// Snapshot of pending-table counters.
#[derive(Debug, Clone, Copy)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub late_dropped: u64,
    pub in_flight: usize,
}

/// The set of in-flight queries, shared by all listener and session tasks.
pub struct PendingTable {
    slots: DashMap<u32, PendingSlot>,
    next_id: AtomicU32,
    stats: PendingStats,
}

impl PendingTable {
    /// Create an empty table. The id counter starts at a random point so
    /// successive process runs do not replay the same id sequence.
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_id: AtomicU32::new(rand::random()),
            stats: PendingStats::default(),
        }
    }

    /// Register a new pending query for `source`.
    ///
    /// Returns the allocated correlation id and the receiver the caller
    /// awaits for the outcome. The id is unique among currently pending
    /// queries.
    pub fn register(&self, source: SocketAddr) -> (u32, oneshot::Receiver<QueryOutcome>) {
        let (tx, rx) = oneshot::channel();
        let slot = PendingSlot {
            source,
            registered_at: Instant::now(),
            tx,
        };
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match self.slots.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    entry.insert(slot);
                    self.stats.registered.fetch_add(1, Ordering::Relaxed);
                    trace!(id, %source, "pending query registered");
                    return (id, rx);
                }
            }
        }
    }

    /// Fulfill the slot for `id` with a response payload.
    ///
    /// Returns `false` when no such slot exists anymore; the payload is
    /// dropped and counted as late.
    pub fn complete(&self, id: u32, payload: Vec<u8>) -> bool {
        match self.slots.remove(&id) {
            Some((_, slot)) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                trace!(
                    id,
                    source = %slot.source,
                    elapsed_ms = slot.registered_at.elapsed().as_millis() as u64,
                    "pending query completed"
                );
                // The awaiter may have timed out between removal and send;
                // it will never forward a payload it did not receive in time.
                let _ = slot.tx.send(QueryOutcome::Response(payload));
                true
            }
            None => {
                self.stats.late_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(id, "response frame for unknown id dropped");
                false
            }
        }
    }

    /// Remove the slot for `id` without an outcome (deadline expiry or a
    /// failed send). No-op when already resolved.
    pub fn expire(&self, id: u32) {
        if self.slots.remove(&id).is_some() {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fulfill every outstanding slot with [`QueryOutcome::Cancelled`];
    /// used on session teardown.
    pub fn cancel_all(&self) {
        let ids: Vec<u32> = self.slots.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, slot)) = self.slots.remove(&id) {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                let _ = slot.tx.send(QueryOutcome::Cancelled);
            }
        }
    }

    /// Number of queries currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no queries are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Counter snapshot for shutdown logging.
    #[must_use]
    pub fn stats(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.stats.registered.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            late_dropped: self.stats.late_dropped.load(Ordering::Relaxed),
            in_flight: self.slots.len(),
        }
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn source() -> SocketAddr {
        "127.0.0.1:34567".parse().unwrap()
    }

    #[tokio::test]
    async fn complete_routes_payload_to_registered_slot() {
        let table = PendingTable::new();
        let (id, rx) = table.register(source());

        assert!(table.complete(id, b"reply".to_vec()));
        assert_eq!(rx.await.unwrap(), QueryOutcome::Response(b"reply".to_vec()));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn late_completion_is_dropped_and_counted() {
        let table = PendingTable::new();
        let (id, rx) = table.register(source());
        table.expire(id);
        drop(rx);

        assert!(!table.complete(id, b"late".to_vec()));
        let stats = table.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.late_dropped, 1);
    }

    #[tokio::test]
    async fn cancel_all_fulfills_every_slot() {
        let table = PendingTable::new();
        let (_, rx1) = table.register(source());
        let (_, rx2) = table.register(source());

        table.cancel_all();
        assert_eq!(rx1.await.unwrap(), QueryOutcome::Cancelled);
        assert_eq!(rx2.await.unwrap(), QueryOutcome::Cancelled);
        assert!(table.is_empty());
        assert_eq!(table.stats().cancelled, 2);
    }

    #[tokio::test]
    async fn ids_are_unique_among_pending() {
        let table = Arc::new(PendingTable::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..100 {
                    let (id, rx) = table.register(source());
                    ids.push((id, rx));
                }
                ids.into_iter().map(|(id, _rx)| id).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate pending id {id}");
            }
        }
        assert_eq!(table.len(), 800);
    }

    #[tokio::test]
    async fn id_reuse_after_resolution_is_allowed() {
        let table = PendingTable::new();
        // Force the counter to wrap over an id that is no longer pending.
        table.next_id.store(u32::MAX, Ordering::Relaxed);
        let (id1, rx1) = table.register(source());
        assert_eq!(id1, u32::MAX);
        assert!(table.complete(id1, Vec::new()));
        drop(rx1);

        table.next_id.store(u32::MAX, Ordering::Relaxed);
        let (id2, _rx2) = table.register(source());
        assert_eq!(id2, u32::MAX);
    }

    #[tokio::test]
    async fn register_skips_occupied_ids() {
        let table = PendingTable::new();
        table.next_id.store(5, Ordering::Relaxed);
        let (id1, _rx1) = table.register(source());
        assert_eq!(id1, 5);

        table.next_id.store(5, Ordering::Relaxed);
        let (id2, _rx2) = table.register(source());
        assert_eq!(id2, 6);
    }
}
