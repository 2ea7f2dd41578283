//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint (from the http/https directive)
//!     → listener.rs (resolve, load TLS, bind)
//!     → tls.rs (PEM certificate and key → rustls config)
//!     → idle.rs (per-connection read/write progress deadline)
//!     → listener.rs (serve the axum router until shutdown)
//! ```
//!
//! # Design Decisions
//! - One listener per endpoint, each in its own task
//! - TLS is optional and handled transparently by axum-server
//! - A failing endpoint reports a `ListenError` and never affects the others

pub mod endpoint;
pub mod idle;
pub mod listener;
pub mod tls;

pub use endpoint::Endpoint;
pub use listener::{ListenError, Listener};
