//! Compiled per-location programs.

use axum::http::StatusCode;
use rhai::AST;

use crate::script::bindings::ResponseBinding;
use crate::script::sandbox::Sandbox;
use crate::script::{compile, ScriptError};

/// One step of a location program.
#[derive(Debug, Clone)]
pub enum Stage {
    /// Calls `name(request)`; anything but `true` denies the request.
    Guard { name: String, ast: AST },
    /// Calls `name(request, response)`; returning `false` stops the chain.
    Middleware { name: String, ast: AST },
    /// The location's content.
    Content(AST),
}

impl Stage {
    pub fn guard(name: &str) -> Result<Self, ScriptError> {
        Ok(Self::Guard {
            name: name.to_string(),
            ast: compile(&format!("{}(request)", name))?,
        })
    }

    pub fn middleware(name: &str) -> Result<Self, ScriptError> {
        Ok(Self::Middleware {
            name: name.to_string(),
            ast: compile(&format!("{}(request, response)", name))?,
        })
    }
}

/// How a program run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Denied,
    Halted,
}

/// Everything a location runs for one request, in order.
#[derive(Debug, Clone)]
pub struct ScriptProgram {
    label: String,
    stages: Vec<Stage>,
}

impl ScriptProgram {
    pub fn new(label: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            label: label.into(),
            stages,
        }
    }

    /// The location path this program serves.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn run(&self, sandbox: &mut Sandbox, response: &ResponseBinding) -> Result<Outcome, ScriptError> {
        for stage in &self.stages {
            match stage {
                Stage::Guard { name, ast } => {
                    if !sandbox.eval(ast)?.as_bool().unwrap_or(false) {
                        tracing::debug!(location = %self.label, guard = %name, "Request denied");
                        if response.is_untouched() {
                            response.set_status(StatusCode::UNAUTHORIZED);
                        }
                        return Ok(Outcome::Denied);
                    }
                }
                Stage::Middleware { name, ast } => {
                    if sandbox.eval(ast)?.as_bool() == Ok(false) {
                        tracing::debug!(location = %self.label, middleware = %name, "Chain halted");
                        return Ok(Outcome::Halted);
                    }
                }
                Stage::Content(ast) => {
                    let _ = sandbox.eval(ast)?;
                }
            }
        }
        Ok(Outcome::Completed)
    }
}
