//! Configuration loading and validation
//!
//! Both daemons are configured from a JSON file with the keys described in
//! `types`. Loading validates eagerly so that every configuration problem is
//! fatal at startup rather than surfacing mid-relay.

mod loader;
mod types;

pub use loader::{
    load_client_config, load_client_config_str, load_server_config, load_server_config_str,
};
pub use types::{resolve_host_port, ClientConfig, LogLevel, ServerConfig};
