//! Logging initialization
//!
//! `RUST_LOG` takes precedence over the configured level. When `LogFile` is
//! set, output goes to that file (append) without ANSI colors; otherwise to
//! stderr-compatible stdout formatting.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an `io::Error` if the log file cannot be opened.
pub fn init(level: LogLevel, log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(level.as_level().into())
        // Reduce noise from dependencies
        .add_directive("tungstenite=warn".parse().unwrap())
        .add_directive("tokio_tungstenite=warn".parse().unwrap())
        .add_directive("rustls=warn".parse().unwrap());

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
