//! Client daemon: UDP listener pool, pending-query table, upstream session
//!
//! The client binds one or more loopback UDP endpoints, tags every received
//! datagram with a fresh correlation id, and relays it over the single
//! authenticated WebSocket session. Responses are demultiplexed back to the
//! originating UDP source through the pending-query table.

mod listener;
mod pending;
mod selftest;
mod service;
mod session;

pub use listener::UdpListenerPool;
pub use pending::{PendingStatsSnapshot, PendingTable, QueryOutcome, QUERY_DEADLINE};
pub use selftest::{run_probe, ProbeError, ProbeReport};
pub use service::ClientService;
pub use session::UpstreamSession;
