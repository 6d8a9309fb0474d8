//! dnsveil-client: local DNS tunnel daemon
//!
//! Binds the configured loopback UDP endpoints and relays DNS queries over
//! an authenticated WebSocket to a dnsveil server.
//!
//! ```bash
//! dnsveil-client -c /etc/dnsveil/client.json
//!
//! # one A-record probe through the tunnel, then exit
//! dnsveil-client -c /etc/dnsveil/client.json --test
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info};

use dnsveil::client::{run_probe, ClientService};
use dnsveil::{config, logging};

struct Args {
    config_path: PathBuf,
    check_config: bool,
    self_test: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/dnsveil/client.json");
        let mut check_config = false;
        let mut self_test = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => check_config = true,
                "--test" | "test" => self_test = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("dnsveil-client v{}", dnsveil::VERSION);
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
            self_test,
        }
    }
}

fn print_help() {
    println!(
        r#"dnsveil-client v{}

Local DNS tunnel daemon: accepts UDP DNS on loopback and relays it over an
authenticated WebSocket to a dnsveil server.

USAGE:
    dnsveil-client [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Configuration file path [default: /etc/dnsveil/client.json]
    --check               Validate the configuration and exit
    --test                Start, send one DNS A query through the tunnel, and exit
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

    let config = config::load_client_config(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path.display()))?;

    if args.check_config {
        println!(
            "configuration OK: {} endpoint(s), resolver {}",
            config.end_points.len(),
            config.resolver
        );
        return Ok(());
    }

    logging::init(config.log_level, config.log_file.as_deref())
        .context("initializing logging")?;
    info!(version = dnsveil::VERSION, "dnsveil client starting");

    let service = ClientService::start(&config).await?;

    if args.self_test {
        let endpoint = *service
            .local_addrs()
            .first()
            .context("no bound endpoint for self-test")?;
        match run_probe(endpoint).await {
            Ok(report) => info!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                answers = report.answers,
                rcode = %report.response_code,
                "self-test succeeded"
            ),
            Err(e) => error!(error = %e, "self-test failed"),
        }
        service.stop().await;
        return Ok(());
    }

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
