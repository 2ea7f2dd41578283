//! Per-request interpreter sandboxes.
//!
//! # Responsibilities
//! - Build a fresh interpreter and scope for every request
//! - Seed it with copies of the frozen root globals and script functions
//! - Bind `request` and `response`
//! - Track live sandboxes so their release can be observed
//!
//! # Design Decisions
//! - A sandbox is owned by exactly one request and never shared
//! - Release is tied to `Drop`, so it happens on errors and panics too

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rhai::{Dynamic, Engine, Scope, AST};

use crate::script::bindings::{self, RequestBinding, ResponseBinding};
use crate::script::engine::{Budget, ScriptEngine};
use crate::script::root::FrozenRoot;
use crate::script::ScriptError;

/// Global atomic counter for sandbox IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static SANDBOX_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a sandbox, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxId(u64);

impl SandboxId {
    pub fn new() -> Self {
        Self(SANDBOX_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sandbox-{}", self.0)
    }
}

/// Counts sandboxes that have been created but not yet released.
#[derive(Debug, Clone, Default)]
pub struct SandboxTracker {
    active_count: Arc<AtomicU64>,
}

impl SandboxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live sandbox. Returns a guard that decrements on drop.
    pub fn track(&self) -> SandboxGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        SandboxGuard {
            active_count: Arc::clone(&self.active_count),
            id: SandboxId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a sandbox's lifetime.
#[derive(Debug)]
pub struct SandboxGuard {
    active_count: Arc<AtomicU64>,
    id: SandboxId,
}

impl SandboxGuard {
    pub fn id(&self) -> SandboxId {
        self.id
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(sandbox_id = %self.id, "Sandbox released");
    }
}

/// An isolated interpreter for one request.
pub struct Sandbox {
    engine: Engine,
    scope: Scope<'static>,
    guard: SandboxGuard,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.guard.id)
            .field("bindings", &self.scope.len())
            .finish()
    }
}

impl Sandbox {
    pub fn id(&self) -> SandboxId {
        self.guard.id()
    }

    /// Evaluate a compiled script against this sandbox's scope.
    pub fn eval(&mut self, ast: &AST) -> Result<Dynamic, ScriptError> {
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, ast)
            .map_err(ScriptError::from_eval)
    }

    /// Current value of a binding in this sandbox.
    pub fn binding(&self, name: &str) -> Option<Dynamic> {
        self.scope.get_value::<Dynamic>(name)
    }
}

struct FactoryInner {
    scripts: ScriptEngine,
    root: FrozenRoot,
    tracker: SandboxTracker,
}

/// Creates sandboxes from the frozen root state. Cheap to clone.
#[derive(Clone)]
pub struct SandboxFactory {
    inner: Arc<FactoryInner>,
}

impl std::fmt::Debug for SandboxFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxFactory")
            .field("globals", &self.inner.root.names().count())
            .field("active", &self.inner.tracker.active_count())
            .finish()
    }
}

impl SandboxFactory {
    pub fn new(scripts: ScriptEngine, root: FrozenRoot) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                scripts,
                root,
                tracker: SandboxTracker::new(),
            }),
        }
    }

    pub fn root(&self) -> &FrozenRoot {
        &self.inner.root
    }

    pub fn scripts(&self) -> &ScriptEngine {
        &self.inner.scripts
    }

    pub fn tracker(&self) -> &SandboxTracker {
        &self.inner.tracker
    }

    /// Build a sandbox for one request.
    ///
    /// `cancel` lets the caller stop the evaluation early; the configured
    /// script timeout applies from this call on.
    pub fn create(
        &self,
        request: RequestBinding,
        response: ResponseBinding,
        cancel: Arc<AtomicBool>,
    ) -> Sandbox {
        let guard = self.inner.tracker.track();
        let budget = Budget::new(Instant::now() + self.inner.scripts.settings().timeout(), cancel);

        let mut engine = self.inner.scripts.interpreter(Some(budget));
        engine.register_global_module(self.inner.root.functions());
        bindings::register(&mut engine);

        let mut scope = Scope::new();
        self.inner.root.copy_into(&mut scope);
        scope.push("request", request);
        scope.push("response", response);

        tracing::trace!(sandbox_id = %guard.id(), "Sandbox created");
        Sandbox {
            engine,
            scope,
            guard,
        }
    }
}
