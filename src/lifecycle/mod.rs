//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → supervisor drains every listener → Stopped
//! ```
//!
//! # Design Decisions
//! - One shutdown signal shared by every listener
//! - Shutdown has a timeout: in-flight requests get the drain window, then close

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_on_signal;
