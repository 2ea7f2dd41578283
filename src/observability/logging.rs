//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick the output format (pretty for terminals, JSON for collectors)
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when it is set
//! - Script `print`/`debug` output uses the `script` target

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Default filter directives for `level`.
pub fn default_filter(level: &str) -> String {
    format!(
        "{crate_name}={level},tower_http={level},script={level}",
        crate_name = env!("CARGO_PKG_NAME").replace('-', "_"),
        level = level
    )
}

/// Install the global subscriber.
pub fn init(level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
}
