//! Server assembly and supervision.
//!
//! # Data Flow
//! ```text
//! bytes / file
//!     → config::decode (Declarations)
//!     → directive::assemble (Registry applies each declaration to a ServerBuilder)
//!     → builder.rs::seal (Server, immutable)
//!     → supervisor.rs (init hooks → freeze root → listeners)
//!     → dispatch.rs (route lookup → sandboxed program)
//! ```
//!
//! # Design Decisions
//! - Loading never starts anything; `Server::start`/`run` do
//! - The registry, settings and apply policy are explicit `Loader` inputs

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::{decode, DecodeError, ServerSettings};
use crate::directive::{assemble, ApplyError, ApplyPolicy, Registry};

pub mod builder;
pub mod dispatch;
pub mod supervisor;

pub use builder::{Handler, InitHook, Server, ServerBuilder};
pub use dispatch::EndpointInfo;
pub use supervisor::{RunError, Running, SupervisorState};

/// Error type for loading a server from configuration.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Decodes configuration and assembles a [`Server`].
#[derive(Debug, Default)]
pub struct Loader {
    registry: Registry,
    settings: ServerSettings,
    policy: ApplyPolicy,
}

impl Loader {
    /// A loader with the built-in directives, default settings and
    /// [`ApplyPolicy::Abort`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: ApplyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decode `bytes` and apply every declaration.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Server, LoadError> {
        let decls = decode(bytes)?;
        let mut builder = ServerBuilder::new(self.settings.clone());
        let warnings = assemble(&decls, &self.registry, &mut builder, self.policy)?;
        Ok(builder.seal(warnings))
    }

    /// Read a configuration file and load it.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Server, LoadError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Configuration read");
        self.load_bytes(&bytes)
    }
}

/// Assemble a server from configuration bytes with the built-in directives.
pub fn new_from_bytes(bytes: &[u8]) -> Result<Server, LoadError> {
    Loader::new().load_bytes(bytes)
}

/// Assemble a server from a configuration file with the built-in directives.
pub fn new_from_file(path: impl AsRef<Path>) -> Result<Server, LoadError> {
    Loader::new().load_file(path)
}
