//! Directive-driven scripted HTTP server library.
//!
//! A server is assembled from an ordered list of configuration declarations.
//! Each declaration is matched to a directive (`init`, `http`/`https`,
//! `location`) that mutates a [`ServerBuilder`]; the sealed [`Server`] then
//! runs init scripts once, listens on every endpoint, and serves each request
//! by running its location's script in a fresh, isolated sandbox.
//!
//! ```text
//! config bytes → Declarations → Registry/assemble → ServerBuilder → Server
//!                                                                    │
//!          init hooks → RootState → FrozenRoot ◀─────────────────────┤
//!                                     │                              │
//!        request → RouteTable → SandboxFactory::create → ScriptProgram::run
//! ```

// Core subsystems
pub mod config;
pub mod directive;
pub mod net;
pub mod routing;
pub mod script;
pub mod server;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerSettings;
pub use directive::{ApplyPolicy, Directive, Registry};
pub use lifecycle::Shutdown;
pub use server::{new_from_bytes, new_from_file, LoadError, Loader, RunError, Running, Server, ServerBuilder};
