//! directive-server
//!
//! Loads a declaration file, assembles the server and serves until SIGINT or
//! SIGTERM.

use std::path::PathBuf;

use clap::Parser;

use directive_server::config::ServerSettings;
use directive_server::directive::ApplyPolicy;
use directive_server::lifecycle::{self, Shutdown};
use directive_server::observability::{logging, LogFormat};
use directive_server::Loader;

#[derive(Debug, Parser)]
#[command(name = "directive-server", version, about = "Directive-driven scripted HTTP server")]
struct Cli {
    /// Declaration file (YAML sequence of directives).
    #[arg(short, long, default_value = "server.yaml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Skip declarations that fail to apply instead of aborting.
    #[arg(long)]
    lenient: bool,

    /// Seconds a client may take to send the request head.
    #[arg(long)]
    header_read_secs: Option<u64>,

    /// Seconds allowed for a whole request.
    #[arg(long)]
    request_secs: Option<u64>,

    /// Seconds a connection may make no read or write progress.
    #[arg(long)]
    idle_secs: Option<u64>,

    /// HTTP/2 keep-alive ping interval in seconds.
    #[arg(long)]
    keep_alive_secs: Option<u64>,

    /// Seconds in-flight requests get to finish on shutdown.
    #[arg(long)]
    drain_secs: Option<u64>,

    /// Per-request script budget in milliseconds.
    #[arg(long)]
    script_timeout_ms: Option<u64>,

    /// Interpreter operations allowed per request (0 = unlimited).
    #[arg(long)]
    max_operations: Option<u64>,

    #[arg(long)]
    max_body_bytes: Option<usize>,

    #[arg(long)]
    max_concurrent_requests: Option<usize>,
}

impl Cli {
    fn settings(&self) -> ServerSettings {
        let mut settings = ServerSettings::default();
        if let Some(v) = self.header_read_secs {
            settings.timeouts.header_read_secs = v;
        }
        if let Some(v) = self.request_secs {
            settings.timeouts.request_secs = v;
        }
        if let Some(v) = self.idle_secs {
            settings.timeouts.idle_secs = v;
        }
        if let Some(v) = self.keep_alive_secs {
            settings.timeouts.keep_alive_secs = v;
        }
        if let Some(v) = self.drain_secs {
            settings.timeouts.drain_secs = v;
        }
        if let Some(v) = self.script_timeout_ms {
            settings.script.timeout_ms = v;
        }
        if let Some(v) = self.max_operations {
            settings.script.max_operations = v;
        }
        if let Some(v) = self.max_body_bytes {
            settings.limits.max_body_bytes = v;
        }
        if let Some(v) = self.max_concurrent_requests {
            settings.limits.max_concurrent_requests = v;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "directive-server starting");

    let settings = cli.settings();
    tracing::info!(
        request_timeout_secs = settings.timeouts.request_secs,
        script_timeout_ms = settings.script.timeout_ms,
        max_body_bytes = settings.limits.max_body_bytes,
        "Settings loaded"
    );

    let policy = if cli.lenient {
        ApplyPolicy::Skip
    } else {
        ApplyPolicy::Abort
    };
    let server = Loader::new()
        .with_settings(settings)
        .with_policy(policy)
        .load_file(&cli.config)?;

    let shutdown = Shutdown::new();
    tokio::spawn(lifecycle::shutdown_on_signal(shutdown.clone()));

    server.run(shutdown.signalled()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
