//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!     → logging.rs (EnvFilter + pretty or JSON formatter)
//!
//! Per request:
//!     → x-request-id (tower-http) on every log line of the request
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through dispatch and script error logs

pub mod logging;

pub use logging::LogFormat;
