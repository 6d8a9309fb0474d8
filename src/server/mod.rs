//! Server daemon: WebSocket acceptor, session registry, query forwarder
//!
//! The server accepts WebSocket upgrades behind a TLS-terminating proxy,
//! authenticates each connection by its first TEXT message, and runs one
//! session per connection. Each inbound framed query spawns a forwarder that
//! performs a single UDP exchange with the configured upstream resolver and
//! writes the framed reply back on the same session.

mod acceptor;
mod forwarder;
mod registry;
mod service;
mod session;

pub use registry::{RegistryStatsSnapshot, SessionHandle, SessionRegistry};
pub use service::ServerService;
