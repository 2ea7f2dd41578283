//! Directive subsystem.
//!
//! # Data Flow
//! ```text
//! Declarations (source order)
//!     → registry.rs (for each directive in registry order,
//!                    every unclaimed declaration it accepts)
//!     → init.rs      → ServerBuilder::on_init
//!     → http.rs      → ServerBuilder::endpoint
//!     → location.rs  → ServerBuilder::route
//! ```
//!
//! # Design Decisions
//! - Registry order is directive-class priority: init, then http, then location
//! - Directives are stateless; `apply` re-decodes its fields every time
//! - Directives validate fully before touching the builder
//! - Unmatched declarations warn, apply failures abort (by default)

use thiserror::Error;

use crate::config::Declaration;
use crate::routing::RouteError;
use crate::script::ScriptError;
use crate::server::ServerBuilder;

pub mod http;
pub mod init;
pub mod location;
pub mod registry;

pub use http::HttpDirective;
pub use init::InitDirective;
pub use location::LocationDirective;
pub use registry::{assemble, ApplyError, ApplyPolicy, DispatchWarning, Registry};

/// Package name of the built-in directives.
pub const BUILTIN_PACKAGE: &str = "builtin";

/// Whether later directives may also process a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// The declaration is claimed; later directives skip it.
    #[default]
    Stop,
    /// Later directives that accept the declaration apply it too.
    Continue,
}

/// Errors raised while applying a declaration.
#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("field remap failed: {0}")]
    Remap(#[from] serde_yaml::Error),

    #[error("{0}")]
    Validation(String),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("route error: {0}")]
    Route(#[from] RouteError),
}

impl DirectiveError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// A unit that recognizes one class of declaration and applies it.
pub trait Directive: Send + Sync {
    /// Registry key and log name.
    fn name(&self) -> &'static str;

    fn package(&self) -> &'static str;

    /// True if this directive recognizes the declaration. Must be pure.
    fn accept(&self, decl: &Declaration) -> bool;

    /// Apply the declaration to the builder.
    fn apply(&self, builder: &mut ServerBuilder, decl: &Declaration) -> Result<Flow, DirectiveError>;
}

impl std::fmt::Debug for dyn Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.package(), self.name())
    }
}
