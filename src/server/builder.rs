//! The mutable server builder and its sealed form.
//!
//! # Responsibilities
//! - Give directives their capability surface: init hooks, endpoints, routes
//! - Answer which script functions init scripts define
//! - Seal into an immutable [`Server`]
//!
//! # Design Decisions
//! - Only assembly holds a `&mut ServerBuilder`; it is single-threaded
//! - `seal` consumes the builder, so nothing mutates a running server

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ServerSettings;
use crate::directive::DispatchWarning;
use crate::net::Endpoint;
use crate::routing::{RouteError, RouteHandle, RouteTable};
use crate::script::{RootState, ScriptError, ScriptProgram};

type InitFn = Box<dyn FnOnce(&mut RootState) -> Result<(), ScriptError> + Send>;

/// Handler stored in the route table.
pub type Handler = Arc<ScriptProgram>;

/// One-shot callable run against the root interpreter state before serving.
pub struct InitHook {
    label: String,
    run: InitFn,
}

impl std::fmt::Debug for InitHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitHook").field("label", &self.label).finish_non_exhaustive()
    }
}

impl InitHook {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&mut RootState) -> Result<(), ScriptError> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn run(self, root: &mut RootState) -> Result<(), ScriptError> {
        (self.run)(root)
    }
}

/// Accumulates everything directives declare.
#[derive(Debug)]
pub struct ServerBuilder {
    settings: ServerSettings,
    endpoints: Vec<Endpoint>,
    init_hooks: Vec<InitHook>,
    routes: RouteTable<Handler>,
    script_fns: BTreeSet<String>,
}

impl ServerBuilder {
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            endpoints: Vec::new(),
            init_hooks: Vec::new(),
            routes: RouteTable::new(),
            script_fns: BTreeSet::new(),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Register a hook to run on the root state during startup.
    pub fn on_init(&mut self, hook: InitHook) {
        tracing::debug!(hook = %hook.label, "Init hook registered");
        self.init_hooks.push(hook);
    }

    /// Register an endpoint to listen on.
    pub fn endpoint(&mut self, endpoint: Endpoint) {
        tracing::debug!(endpoint = %endpoint, "Endpoint registered");
        self.endpoints.push(endpoint);
    }

    /// Add a route; attach matchers and a handler through the returned handle.
    pub fn route(&mut self, path: &str) -> Result<RouteHandle<'_, Handler>, RouteError> {
        self.routes.route(path)
    }

    /// Record script functions an init script will define.
    pub fn declare_script_fns<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_fns.extend(names.into_iter().map(Into::into));
    }

    /// True if some init script defines a function called `name`.
    pub fn has_script_fn(&self, name: &str) -> bool {
        self.script_fns.contains(name)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn init_hook_count(&self) -> usize {
        self.init_hooks.len()
    }

    pub fn routes(&self) -> &RouteTable<Handler> {
        &self.routes
    }

    /// Freeze the builder into a server.
    pub fn seal(self, warnings: Vec<DispatchWarning>) -> Server {
        Server {
            settings: self.settings,
            endpoints: self.endpoints,
            init_hooks: self.init_hooks,
            routes: Arc::new(self.routes),
            warnings,
        }
    }
}

/// An assembled server. Read-only; start it with [`Server::start`] or
/// [`Server::run`].
#[derive(Debug)]
pub struct Server {
    pub(crate) settings: ServerSettings,
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) init_hooks: Vec<InitHook>,
    pub(crate) routes: Arc<RouteTable<Handler>>,
    pub(crate) warnings: Vec<DispatchWarning>,
}

impl Server {
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn init_hooks(&self) -> impl Iterator<Item = &str> {
        self.init_hooks.iter().map(InitHook::label)
    }

    pub fn routes(&self) -> &RouteTable<Handler> {
        &self.routes
    }

    /// Declarations that no directive accepted, or that were skipped.
    pub fn warnings(&self) -> &[DispatchWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptEngine;

    #[test]
    fn init_hooks_keep_registration_order() {
        let mut builder = ServerBuilder::new(ServerSettings::default());
        builder.on_init(InitHook::new("first", |_| Ok(())));
        builder.on_init(InitHook::new("second", |_| Ok(())));
        let server = builder.seal(Vec::new());
        assert_eq!(server.init_hooks().collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[test]
    fn hook_runs_against_root_state() {
        let hook = InitHook::new("set", |root| {
            root.set_global("answer", 42_i64);
            Ok(())
        });
        let mut root = RootState::new(&ScriptEngine::new(Default::default()));
        hook.run(&mut root).unwrap();
        assert_eq!(root.global("answer").unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn script_fns_are_queryable() {
        let mut builder = ServerBuilder::new(ServerSettings::default());
        builder.declare_script_fns(["greet", "allow"]);
        assert!(builder.has_script_fn("greet"));
        assert!(!builder.has_script_fn("missing"));
    }

    #[test]
    fn seal_keeps_endpoints_and_routes() {
        let mut builder = ServerBuilder::new(ServerSettings::default());
        builder.endpoint(Endpoint::plain("127.0.0.1:0"));
        builder.route("/a").unwrap();
        let server = builder.seal(Vec::new());
        assert_eq!(server.endpoints().len(), 1);
        assert_eq!(server.routes().len(), 1);
    }
}
