//! QuillKV - An In-Memory Key-Value and Sorted-Set Server
//!
//! This is the main entry point for the QuillKV server.
//! It parses the command line, binds the listener and runs the reactor on a
//! dedicated blocking thread until Ctrl+C.

use quillkv::{Reactor, ServerConfig};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                config.host = required_value(&args, i, "--host").to_string();
                i += 2;
            }
            "--port" | "-p" => {
                config.port = parse_value(&args, i, "--port", "invalid port number");
                i += 2;
            }
            "--idle-timeout-ms" => {
                let ms: u64 = parse_value(&args, i, "--idle-timeout-ms", "invalid timeout");
                config.idle_timeout = Duration::from_millis(ms);
                i += 2;
            }
            "--dispose-threads" => {
                config.dispose_threads =
                    parse_value(&args, i, "--dispose-threads", "invalid thread count");
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("QuillKV version {}", quillkv::VERSION);
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

fn required_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str, what: &str) -> T {
    required_value(args, i, flag).parse().unwrap_or_else(|_| {
        eprintln!("Error: {}", what);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
QuillKV - An In-Memory Key-Value and Sorted-Set Server

USAGE:
    quillkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>            Port to listen on (default: 1234)
        --idle-timeout-ms <MS>   Close connections idle this long (default: 30000)
        --dispose-threads <N>    Threads freeing large sorted sets (default: 4)
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    quillkv                        # Start on 127.0.0.1:1234
    quillkv --port 4321            # Start on port 4321
    quillkv --host 0.0.0.0         # Listen on all interfaces

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=quillkv=debug
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
QuillKV v{} - In-Memory Key-Value and Sorted-Set Server
──────────────────────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        quillkv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Bind before printing the banner so a busy port fails fast
    let mut reactor = Reactor::bind(&config)?;
    print_banner(&config);
    info!(
        addr = %config.bind_address(),
        idle_timeout_ms = config.idle_timeout.as_millis() as u64,
        dispose_threads = config.dispose_threads,
        "Listening"
    );

    let shutdown = reactor.shutdown_handle();
    let stats = reactor.stats();

    // The reactor blocks in poll(2), so it gets a thread of its own
    let mut server = tokio::task::spawn_blocking(move || reactor.run());

    tokio::select! {
        result = &mut server => {
            // The reactor only returns on its own after a fatal poll error
            if let Err(e) = result? {
                error!(error = %e, "reactor failed");
                return Err(e.into());
            }
        }
        signal = signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, stopping server...");
            shutdown.store(true, Ordering::Release);
            server.await??;
        }
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
