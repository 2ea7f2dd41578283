//! Directive registry and the assembly pipeline.
//!
//! # Responsibilities
//! - Keep directives in registration order
//! - Select the directive for a declaration (first that accepts)
//! - Apply every declaration, directive class by directive class
//!
//! # Design Decisions
//! - The registry is an explicit value, never a global
//! - Registry order decides directive-class priority; source order decides
//!   the order within one class
//! - A declaration nobody accepts is a warning, not an error

use thiserror::Error;

use crate::config::{Declaration, Declarations};
use crate::directive::{Directive, DirectiveError, Flow, HttpDirective, InitDirective, LocationDirective};
use crate::server::ServerBuilder;

/// Ordered, append-only collection of directives.
#[derive(Debug)]
pub struct Registry {
    directives: Vec<Box<dyn Directive>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// A registry with no directives.
    pub fn empty() -> Self {
        Self {
            directives: Vec::new(),
        }
    }

    /// The built-in directives: init, http, location.
    pub fn builtin() -> Self {
        Self::empty()
            .with(InitDirective)
            .with(HttpDirective)
            .with(LocationDirective)
    }

    /// Append a directive; it gets the lowest priority so far.
    pub fn register(&mut self, directive: Box<dyn Directive>) {
        tracing::debug!(directive = directive.name(), package = directive.package(), "Directive registered");
        self.directives.push(directive);
    }

    pub fn with(mut self, directive: impl Directive + 'static) -> Self {
        self.register(Box::new(directive));
        self
    }

    /// First directive, in registry order, that accepts the declaration.
    pub fn select(&self, decl: &Declaration) -> Option<&dyn Directive> {
        self.directives
            .iter()
            .map(Box::as_ref)
            .find(|d| d.accept(decl))
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Directive> {
        self.directives.iter().map(Box::as_ref)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

/// What to do when a directive fails to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyPolicy {
    /// The first failure aborts assembly.
    #[default]
    Abort,
    /// Log the failure, skip the declaration, keep going.
    Skip,
}

/// Non-fatal findings of an assembly run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchWarning {
    /// No directive accepted the declaration.
    Unmatched { index: usize, fields: Vec<String> },
    /// A directive failed and the declaration was skipped (`ApplyPolicy::Skip`).
    Skipped {
        index: usize,
        directive: &'static str,
        error: String,
    },
}

impl std::fmt::Display for DispatchWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchWarning::Unmatched { index, fields } => {
                write!(f, "declaration #{} matched no directive (fields: {})", index, fields.join(", "))
            }
            DispatchWarning::Skipped { index, directive, error } => {
                write!(f, "declaration #{} skipped by {}: {}", index, directive, error)
            }
        }
    }
}

/// A directive failed to apply a declaration.
#[derive(Debug, Error)]
#[error("{directive} directive failed on declaration #{index}: {source}")]
pub struct ApplyError {
    pub directive: &'static str,
    pub index: usize,
    #[source]
    pub source: DirectiveError,
}

/// Apply every declaration to the builder.
///
/// For each directive in registry order, every declaration it accepts is
/// applied in source order, unless an earlier directive already claimed it.
pub fn assemble(
    decls: &Declarations,
    registry: &Registry,
    builder: &mut ServerBuilder,
    policy: ApplyPolicy,
) -> Result<Vec<DispatchWarning>, ApplyError> {
    let mut warnings = Vec::new();

    for decl in decls {
        if registry.select(decl).is_none() {
            tracing::warn!(declaration = %decl, "No directive for declaration");
            warnings.push(DispatchWarning::Unmatched {
                index: decl.index(),
                fields: decl.field_names().map(str::to_string).collect(),
            });
        }
    }

    let mut claimed = vec![false; decls.len()];
    for directive in registry.iter() {
        for (pos, decl) in decls.iter().enumerate() {
            if claimed[pos] || !directive.accept(decl) {
                continue;
            }
            match directive.apply(builder, decl) {
                Ok(flow) => {
                    tracing::debug!(directive = directive.name(), declaration = %decl, ?flow, "Declaration applied");
                    claimed[pos] = flow == Flow::Stop;
                }
                Err(source) if policy == ApplyPolicy::Skip => {
                    tracing::warn!(directive = directive.name(), declaration = %decl, error = %source, "Declaration skipped");
                    warnings.push(DispatchWarning::Skipped {
                        index: decl.index(),
                        directive: directive.name(),
                        error: source.to_string(),
                    });
                    claimed[pos] = true;
                }
                Err(source) => {
                    tracing::error!(directive = directive.name(), declaration = %decl, error = %source, "Declaration failed");
                    return Err(ApplyError {
                        directive: directive.name(),
                        index: decl.index(),
                        source,
                    });
                }
            }
        }
    }

    tracing::info!(
        declarations = decls.len(),
        endpoints = builder.endpoints().len(),
        init_hooks = builder.init_hook_count(),
        routes = builder.routes().len(),
        warnings = warnings.len(),
        "Assembly complete"
    );
    Ok(warnings)
}
