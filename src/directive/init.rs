//! The `init` directive: scripts run once on the root state before serving.
//!
//! ```yaml
//! - init: |
//!     let motd = "hi";
//!     fn allow(req) { req.header("x-token") == "secret" }
//! - init: scripts/setup.rhai
//! - init: file:scripts/more.rhai
//! ```
//!
//! A `file:` prefix must name a readable file. A bare value is read as a
//! file when one exists at that path, otherwise it is the script itself.

use std::fs;
use std::io::ErrorKind;

use serde_yaml::Value;

use crate::config::Declaration;
use crate::directive::{Directive, DirectiveError, Flow, BUILTIN_PACKAGE};
use crate::script::{compile, RootState};
use crate::server::{InitHook, ServerBuilder};

const FIELD: &str = "init";
const FILE_PREFIX: &str = "file:";

/// Greeting bound as `motd` unless an earlier hook bound it.
pub const DEFAULT_MOTD: &str = "hello, world";

#[derive(Debug, Clone, Copy, Default)]
pub struct InitDirective;

impl Directive for InitDirective {
    fn name(&self) -> &'static str {
        FIELD
    }

    fn package(&self) -> &'static str {
        BUILTIN_PACKAGE
    }

    fn accept(&self, decl: &Declaration) -> bool {
        decl.contains(FIELD)
    }

    fn apply(&self, builder: &mut ServerBuilder, decl: &Declaration) -> Result<Flow, DirectiveError> {
        let value = match decl.get(FIELD) {
            Some(Value::String(value)) => value,
            _ => return Err(DirectiveError::validation("init directive value is not a string")),
        };

        let source = resolve_source(value)?;
        let ast = compile(&source)?;
        let functions: Vec<String> = ast.iter_functions().map(|f| f.name.to_string()).collect();

        tracing::debug!(declaration = %decl, functions = ?functions, "Init script compiled");
        builder.declare_script_fns(functions);
        builder.on_init(InitHook::new(format!("init#{}", decl.index()), move |root| {
            seed_globals(root);
            root.run(&ast)
        }));
        Ok(Flow::Stop)
    }
}

/// The value names a file to read, or is the script itself.
fn resolve_source(value: &str) -> Result<String, DirectiveError> {
    if let Some(path) = value.trim().strip_prefix(FILE_PREFIX) {
        let path = path.trim();
        let contents = fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path, error = %e, "Init script file unreadable");
            DirectiveError::validation(format!("cannot read init file {}: {}", path, e))
        })?;
        tracing::debug!(path = %path, "Init script read from file");
        return Ok(contents);
    }

    let candidate = value.trim();
    if candidate.is_empty() {
        return Ok(value.to_string());
    }
    match fs::read_to_string(candidate) {
        Ok(contents) => {
            tracing::debug!(path = %candidate, "Init script read from file");
            Ok(contents)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(value.to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "Init value is not a readable file; treating it as source");
            Ok(value.to_string())
        }
    }
}

fn seed_globals(root: &mut RootState) {
    if !root.has_global("motd") {
        root.set_global("motd", DEFAULT_MOTD.to_string());
    }
    if !root.has_global("server") {
        let mut identity = rhai::Map::new();
        identity.insert("name".into(), rhai::Dynamic::from(env!("CARGO_PKG_NAME").to_string()));
        identity.insert("version".into(), rhai::Dynamic::from(env!("CARGO_PKG_VERSION").to_string()));
        root.set_global("server", identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{decode, ScriptSettings, ServerSettings};
    use crate::script::{ScriptEngine, ScriptError};

    fn apply(yaml: &str) -> Result<ServerBuilder, DirectiveError> {
        let decls = decode(yaml.as_bytes()).unwrap();
        let mut builder = ServerBuilder::new(ServerSettings::default());
        for decl in &decls {
            InitDirective.apply(&mut builder, decl)?;
        }
        Ok(builder)
    }

    fn run_hooks(builder: ServerBuilder) -> Result<RootState, ScriptError> {
        let mut root = RootState::new(&ScriptEngine::new(ScriptSettings::default()));
        for hook in builder.seal(Vec::new()).init_hooks {
            hook.run(&mut root)?;
        }
        Ok(root)
    }

    #[test]
    fn inline_source_sets_globals() {
        let builder = apply("- init: 'let motd = \"hi\";'\n").unwrap();
        let root = run_hooks(builder).unwrap();
        assert_eq!(root.global("motd").unwrap().to_string(), "hi");
        let server = root.global("server").unwrap().cast::<rhai::Map>();
        assert_eq!(server["name"].to_string(), env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn default_motd_when_script_leaves_it_alone() {
        let builder = apply("- init: 'let x = 1;'\n").unwrap();
        let root = run_hooks(builder).unwrap();
        assert_eq!(root.global("motd").unwrap().to_string(), DEFAULT_MOTD);
    }

    #[test]
    fn file_source_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.rhai");
        fs::write(&path, "let from_file = true;\nfn greet(n) { `hi ${n}` }").unwrap();

        let builder = apply(&format!("- init: '  {}  '\n", path.display())).unwrap();
        assert!(builder.has_script_fn("greet"));
        let root = run_hooks(builder).unwrap();
        assert!(root.global("from_file").unwrap().as_bool().unwrap());
    }

    #[test]
    fn file_prefix_reads_the_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefixed.rhai");
        fs::write(&path, "let prefixed = 7;").unwrap();

        let builder = apply(&format!("- init: 'file:{}'\n", path.display())).unwrap();
        let root = run_hooks(builder).unwrap();
        assert_eq!(root.global("prefixed").unwrap().as_int().unwrap(), 7);
    }

    #[test]
    fn unreadable_prefixed_file_fails_at_apply() {
        let err = apply("- init: 'file:/no/such/init.rhai'\n").unwrap_err();
        match err {
            DirectiveError::Validation(message) => assert!(message.contains("/no/such/init.rhai")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn non_string_value_is_rejected() {
        let err = apply("- init: 42\n").unwrap_err();
        assert!(matches!(err, DirectiveError::Validation(_)));
    }

    #[test]
    fn syntax_error_fails_at_apply() {
        let err = apply("- init: 'let = ;'\n").unwrap_err();
        assert!(matches!(err, DirectiveError::Script(ScriptError::Parse(_))));
    }

    #[test]
    fn runtime_error_fails_the_hook() {
        let builder = apply("- init: 'throw \"nope\";'\n").unwrap();
        assert!(matches!(run_hooks(builder), Err(ScriptError::Eval(_))));
    }

    #[test]
    fn hooks_run_in_declaration_order() {
        let builder = apply("- init: 'let n = 1;'\n- init: 'n += 1; let motd = `n=${n}`;'\n").unwrap();
        let root = run_hooks(builder).unwrap();
        assert_eq!(root.global("motd").unwrap().to_string(), "n=2");
    }
}
