//! The process-wide root interpreter state.
//!
//! Init hooks populate a [`RootState`] once, before any listener starts.
//! Freezing turns it into a [`FrozenRoot`]: deep copies of the named globals
//! plus a module holding every function the init scripts defined. Sandboxes
//! only ever see the frozen copy.

use rhai::{Dynamic, Engine, Module, Scope, Shared, AST};

use crate::script::engine::ScriptEngine;
use crate::script::ScriptError;

/// Mutable root state, owned by the supervisor while init hooks run.
pub struct RootState {
    engine: Engine,
    scope: Scope<'static>,
    functions: AST,
}

impl std::fmt::Debug for RootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootState")
            .field("globals", &self.scope.len())
            .field("functions", &self.functions.iter_functions().count())
            .finish()
    }
}

impl RootState {
    pub fn new(scripts: &ScriptEngine) -> Self {
        Self {
            engine: scripts.interpreter(None),
            scope: Scope::new(),
            functions: AST::empty(),
        }
    }

    /// Bind (or rebind) a global.
    pub fn set_global(&mut self, name: &str, value: impl Into<Dynamic>) {
        self.scope.set_or_push(name, value.into());
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.scope.contains(name)
    }

    pub fn global(&self, name: &str) -> Option<Dynamic> {
        self.scope.get_value::<Dynamic>(name)
    }

    /// Evaluate a script against the root scope.
    ///
    /// Top-level `let`/`const` bindings become globals; functions it defines
    /// join the set exported to sandboxes and stay callable by later scripts.
    pub fn run(&mut self, ast: &AST) -> Result<(), ScriptError> {
        let merged = self.functions.merge(ast);
        self.engine
            .run_ast_with_scope(&mut self.scope, &merged)
            .map_err(ScriptError::from_eval)?;
        self.functions = merged.clone_functions_only();
        Ok(())
    }

    /// Snapshot the state. The result can no longer be mutated.
    pub fn freeze(self) -> Result<FrozenRoot, ScriptError> {
        let globals = self
            .scope
            .iter()
            .map(|(name, constant, value)| Global {
                name: name.to_string(),
                constant,
                value: value.flatten_clone(),
            })
            .collect();
        let functions = Module::eval_ast_as_new(Scope::new(), &self.functions, &self.engine)?;
        Ok(FrozenRoot {
            globals,
            functions: functions.into(),
        })
    }
}

#[derive(Debug, Clone)]
struct Global {
    name: String,
    constant: bool,
    value: Dynamic,
}

/// Immutable snapshot of the root state, shared by all sandboxes.
#[derive(Debug, Clone)]
pub struct FrozenRoot {
    globals: Vec<Global>,
    functions: Shared<Module>,
}

impl Default for FrozenRoot {
    fn default() -> Self {
        Self {
            globals: Vec::new(),
            functions: Module::new().into(),
        }
    }
}

impl FrozenRoot {
    /// Names of the exported globals, in binding order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.globals.iter().map(|g| g.name.as_str())
    }

    /// Value of a global (the latest binding wins).
    pub fn global(&self, name: &str) -> Option<&Dynamic> {
        self.globals.iter().rev().find(|g| g.name == name).map(|g| &g.value)
    }

    /// Seed a sandbox scope with copies of every global.
    pub(crate) fn copy_into(&self, scope: &mut Scope<'_>) {
        for g in &self.globals {
            let value = g.value.flatten_clone();
            if g.constant {
                scope.push_constant_dynamic(g.name.clone(), value);
            } else {
                scope.push_dynamic(g.name.clone(), value);
            }
        }
    }

    pub(crate) fn functions(&self) -> Shared<Module> {
        self.functions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptSettings;
    use crate::script::compile;

    fn root() -> RootState {
        RootState::new(&ScriptEngine::new(ScriptSettings::default()))
    }

    #[test]
    fn top_level_bindings_become_globals() {
        let mut root = root();
        root.run(&compile(r#"let motd = "hi"; const LIMIT = 3;"#).unwrap())
            .unwrap();
        assert!(root.has_global("motd"));

        let frozen = root.freeze().unwrap();
        assert_eq!(frozen.global("motd").unwrap().to_string(), "hi");
        assert_eq!(frozen.global("LIMIT").unwrap().as_int().unwrap(), 3);
        assert_eq!(frozen.names().collect::<Vec<_>>(), vec!["motd", "LIMIT"]);
    }

    #[test]
    fn later_scripts_see_earlier_globals_and_functions() {
        let mut root = root();
        root.set_global("base", 40_i64);
        root.run(&compile("fn add(x) { x + 2 }").unwrap()).unwrap();
        root.run(&compile("let answer = add(base);").unwrap()).unwrap();
        assert_eq!(root.global("answer").unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn host_values_bind_as_globals() {
        let mut root = root();
        let mut identity = rhai::Map::new();
        identity.insert("name".into(), "edge".into());
        root.set_global("who", identity);
        root.set_global("greeting", "hey".to_string());
        root.set_global("greeting", "hello".to_string());

        root.run(&compile("let line = `${greeting} ${who.name}`;").unwrap()).unwrap();
        assert_eq!(root.global("line").unwrap().to_string(), "hello edge");
    }

    #[test]
    fn runtime_errors_surface() {
        let mut root = root();
        let err = root.run(&compile(r#"throw "boom";"#).unwrap()).unwrap_err();
        assert!(matches!(err, ScriptError::Eval(_)));
    }

    #[test]
    fn frozen_copies_are_independent() {
        let mut root = root();
        root.run(&compile("let list = [1, 2];").unwrap()).unwrap();
        let frozen = root.freeze().unwrap();

        let mut scope = Scope::new();
        frozen.copy_into(&mut scope);
        let engine = Engine::new();
        engine.run_with_scope(&mut scope, "list.push(3);").unwrap();

        assert_eq!(frozen.global("list").unwrap().clone().into_array().unwrap().len(), 2);
    }
}
