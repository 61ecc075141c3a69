//! milterkit - Milter Protocol Server
//!
//! This is the main entry point for the milterkit binary. It serves the
//! logging filter, which accepts every message and logs each stage of the
//! SMTP session as the MTA reports it.

use milterkit::connection::{ConnectionConfig, ConnectionStats};
use milterkit::filter::LoggingFilter;
use milterkit::server::serve;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Per-connection limits
    connection: ConnectionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: milterkit::DEFAULT_HOST.to_string(),
            port: milterkit::DEFAULT_PORT,
            connection: ConnectionConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--max-frame-size" => {
                    let max = value_of(&args, i, "--max-frame-size")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid frame size");
                            std::process::exit(1);
                        });
                    config.connection.max_frame_size = Some(max);
                    i += 2;
                }
                "--idle-timeout" => {
                    let secs = value_of(&args, i, "--idle-timeout")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid idle timeout");
                            std::process::exit(1);
                        });
                    config.connection.idle_timeout = Some(Duration::from_secs(secs));
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("milterkit version {}", milterkit::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Returns the value following a flag, or exits.
fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

/// Log filter from `RUST_LOG` directives, falling back to `info`.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Waits for Ctrl+C, or SIGTERM on Unix.
struct Shutdown {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl Shutdown {
    /// Registers the SIGTERM handler right away.
    #[cfg(unix)]
    fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => Some(terminate),
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                None
            }
        };
        Self { terminate }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    /// Resolves with the name of the first signal received.
    async fn recv(self) -> &'static str {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match self.terminate {
                Some(mut terminate) => {
                    terminate.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    }
}

fn print_help() {
    println!(
        r#"
milterkit - Milter Protocol Server

USAGE:
    milterkit [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 8888)
        --max-frame-size <BYTES>   Reject frames larger than this (default: no limit)
        --idle-timeout <SECONDS>   Drop connections idle this long (default: never)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    milterkit                        # Start on 127.0.0.1:8888
    milterkit --port 9999            # Start on port 9999
    milterkit --host 0.0.0.0         # Listen on all interfaces

CONNECTING:
    Point the MTA at the filter, e.g. in Postfix main.cf:
    smtpd_milters = inet:127.0.0.1:8888
"#
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Create connection statistics
    let stats = Arc::new(ConnectionStats::new());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        version = milterkit::VERSION,
        "Listening on {}",
        config.bind_address()
    );

    // Set up graceful shutdown
    let shutdown = Shutdown::install();

    // Main accept loop, one logging filter per connection
    tokio::select! {
        _ = serve(listener, Arc::new(LoggingFilter::new), Arc::clone(&stats), config.connection) => {}
        signal = shutdown.recv() => {
            info!(signal, "Shutdown signal received, stopping server...");
        }
    }

    info!(
        connections = stats
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
