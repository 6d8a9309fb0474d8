//! dnsveil: an encrypted DNS tunnel
//!
//! dnsveil relays plain UDP DNS between a stub resolver and a trusted
//! recursive resolver over a single long-lived, authenticated WebSocket,
//! bypassing the local network's DNS path.
//!
//! # Architecture
//!
//! ```text
//! stub resolver                client daemon                server daemon
//!      |                            |                            |
//!      | UDP query                  |                            |
//!      +--> UDP listener pool ------+                            |
//!      |    pending-query table     |                            |
//!      |    [id | query] =========> | WebSocket (wss) ========>  |
//!      |                            |       per-frame forwarder -+--> upstream
//!      |                            |                            |    resolver
//!      |    [id | reply] <========= | <========================  |   (UDP)
//!      <--+ UDP reply               |                            |
//! ```
//!
//! Every in-flight query is tagged with a 32-bit correlation id so that many
//! concurrent queries from many UDP sources can share one transport. The
//! server is transparent to DNS payloads: it copies the id, performs one UDP
//! exchange with the configured upstream, and frames the reply back.
//!
//! The client half lives in [`client`], the server half in [`server`]. The
//! wire format is defined in [`frame`], the dial path in [`transport`].

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod server;
pub mod shutdown;
pub mod sockopt;
pub mod transport;
pub mod ws;

pub use error::DnsveilError;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
