//! Embedded scripting subsystem.
//!
//! # Data Flow
//! ```text
//! Assembly:
//!     init / location sources → engine.rs::compile → AST (syntax errors fail assembly)
//!
//! Initializing (once per run):
//!     init hooks → root.rs::RootState (globals + script functions)
//!     → freeze → FrozenRoot (immutable, shared via Arc)
//!
//! Per request:
//!     sandbox.rs::SandboxFactory::create
//!         fresh engine + scope, copies of root globals,
//!         request/response bindings (bindings.rs)
//!     → program.rs::ScriptProgram::run (auth → middleware → content)
//!     → sandbox dropped (guard released on every exit path)
//! ```
//!
//! # Design Decisions
//! - No interpreter state is ever shared between requests
//! - Root globals are copied by value; sandboxes cannot reach the root
//! - Every evaluation runs under an operation limit and a deadline

use std::time::Duration;

use thiserror::Error;

pub mod bindings;
pub mod engine;
pub mod program;
pub mod root;
pub mod sandbox;

pub use bindings::{RequestBinding, ResponseBinding, ResponseHeaders};
pub use engine::{compile, ScriptEngine};
pub use program::{Outcome, ScriptProgram, Stage};
pub use root::{FrozenRoot, RootState};
pub use sandbox::{Sandbox, SandboxFactory, SandboxGuard, SandboxTracker};

/// Errors raised while compiling or evaluating scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(#[from] rhai::ParseError),

    #[error("evaluation error: {0}")]
    Eval(#[from] Box<rhai::EvalAltResult>),

    #[error("script terminated: budget exhausted")]
    Terminated,

    #[error("script exceeded its budget of {0:?}")]
    Timeout(Duration),

    #[error("script panicked: {0}")]
    Panicked(String),
}

impl ScriptError {
    /// Classify an evaluation failure, separating budget terminations.
    pub(crate) fn from_eval(err: Box<rhai::EvalAltResult>) -> Self {
        if matches!(*err, rhai::EvalAltResult::ErrorTerminated(..)) {
            Self::Terminated
        } else {
            Self::Eval(err)
        }
    }
}
