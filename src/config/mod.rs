//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML sequence of mappings)
//!     → loader.rs (decode bytes, no partial results)
//!     → declaration.rs (ordered, immutable Declarations)
//!     → directive registry (assembly)
//!
//! CLI flags
//!     → schema.rs (ServerSettings: timeouts, script budget, limits)
//!     → shared by the supervisor and the sandbox factory
//! ```
//!
//! # Design Decisions
//! - Declarations are generic; only directives give fields a meaning
//! - Unknown fields are preserved verbatim and ignored
//! - All settings have defaults to allow minimal configs

pub mod declaration;
pub mod loader;
pub mod schema;

pub use declaration::{Declaration, Declarations};
pub use loader::{decode, DecodeError};
pub use schema::{LimitSettings, ScriptSettings, ServerSettings, TimeoutSettings};
