//! dnsveil-server: DNS tunnel relay daemon
//!
//! Accepts authenticated WebSocket sessions (behind a TLS-terminating
//! proxy) and relays framed DNS queries to the configured upstream resolver
//! over UDP.
//!
//! ```bash
//! dnsveil-server -c /etc/dnsveil/server.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use dnsveil::server::ServerService;
use dnsveil::{config, logging};

struct Args {
    config_path: PathBuf,
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/dnsveil/server.json");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => check_config = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("dnsveil-server v{}", dnsveil::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"dnsveil-server v{}

DNS tunnel relay daemon: accepts authenticated WebSocket sessions and
forwards framed DNS queries to the upstream resolver over UDP.

USAGE:
    dnsveil-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Configuration file path [default: /etc/dnsveil/server.json]
    --check               Validate the configuration and exit
    -h, --help            Print help information
    -v, --version         Print version information

ENVIRONMENT:
    DNSVEIL_LOG_LEVEL     Override the configured log level
    RUST_LOG              Fine-grained tracing filter (takes precedence)
"#,
        dnsveil::VERSION
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_server_config(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path.display()))?;

    if args.check_config {
        println!(
            "configuration OK: {} bind(s), upstream {}, {} token(s)",
            config.urls.len(),
            config.resolver,
            config.auth_token.len()
        );
        return Ok(());
    }

    logging::init(config.log_level, config.log_file.as_deref())
        .context("initializing logging")?;
    info!(version = dnsveil::VERSION, "dnsveil server starting");

    let service = ServerService::start(&config).await?;

    let shutdown = service.shutdown_signal();
    let mut stopped = shutdown.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for interrupt signal")?;
            info!("interrupt received, shutting down");
            shutdown.trigger();
        }
        _ = stopped.recv() => {
            info!("service requested shutdown");
        }
    }
    service.join().await;
    Ok(())
}
