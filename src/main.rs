//! EmberKV server entry point.
//!
//! Opens the storage backend, then accepts TCP connections until Ctrl+C.

use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::service::Service;
use emberkv::storage::{Engine, EngineConfig, MemoryTable, Storage};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
#[derive(Debug)]
struct Config {
    host: String,
    port: u16,
    /// Write-ahead log path; memory-only when unset
    log_path: Option<PathBuf>,
    compact_on_start: bool,
    /// Seconds between background compactions, 0 disables them
    compaction_interval: u64,
    /// Seconds applied to SET without EX/PX, 0 disables it
    default_ttl: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_PORT,
            log_path: None,
            compact_on_start: false,
            compaction_interval: 60,
            default_ttl: 0,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = required(&arg, args.next()),
                "--port" | "-p" => config.port = parse_number(&arg, args.next()),
                "--log" | "-l" => config.log_path = Some(PathBuf::from(required(&arg, args.next()))),
                "--compact-on-start" => config.compact_on_start = true,
                "--compaction-interval" => config.compaction_interval = parse_number(&arg, args.next()),
                "--default-ttl" => config.default_ttl = parse_number(&arg, args.next()),
                "--help" => {
                    print_help();
                    process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn engine_config(&self, log_path: PathBuf) -> EngineConfig {
        let config = EngineConfig::new(log_path).with_compact_on_start(self.compact_on_start);
        match self.compaction_interval {
            0 => config.without_background_compaction(),
            secs => config.with_compaction_interval(Duration::from_secs(secs)),
        }
    }
}

fn required(flag: &str, value: Option<String>) -> String {
    value.unwrap_or_else(|| {
        eprintln!("Error: {} requires a value", flag);
        process::exit(1);
    })
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<String>) -> T {
    required(flag, value).parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid number for {}", flag);
        process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
EmberKV - A Durable In-Memory Key-Value Store

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>                 Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>                 Port to listen on (default: 7379)
    -l, --log <PATH>                  Write-ahead log path (default: memory only)
        --compact-on-start            Compact the log before serving
        --compaction-interval <SECS>  Seconds between compactions, 0 = off (default: 60)
        --default-ttl <SECS>          TTL for SET without EX/PX, 0 = none (default: 0)
    -v, --version                     Print version information
        --help                        Print this help message

EXAMPLES:
    emberkv                                   # Memory only on 127.0.0.1:7379
    emberkv --log data/emberkv.log            # Durable
    emberkv --log data/emberkv.log --compact-on-start --compaction-interval 300

CONNECTING:
    Commands are plain text lines:
    $ nc 127.0.0.1 7379
    SET name ember EX 60
    +OK
    GET name
    $5
    ember
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!(version = emberkv::VERSION, "Starting EmberKV");

    let engine = match &config.log_path {
        Some(path) => Some(Arc::new(Engine::open(config.engine_config(path.clone()))?)),
        None => {
            warn!("No --log given, running memory only; data is lost on exit");
            None
        }
    };

    let storage: Arc<dyn Storage> = match &engine {
        Some(engine) => Arc::clone(engine) as Arc<dyn Storage>,
        None => Arc::new(MemoryTable::new()),
    };

    let mut builder = Service::builder().storage(storage);
    if config.default_ttl > 0 {
        builder = builder.default_ttl(Duration::from_secs(config.default_ttl));
        info!(seconds = config.default_ttl, "Default TTL enabled");
    }
    let service = builder.build();

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C, serving until killed");
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = accept_loop(listener, service, Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    if let Some(engine) = &engine {
        engine.shutdown();
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Accepts incoming connections forever
async fn accept_loop(listener: TcpListener, service: Service, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    service.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
