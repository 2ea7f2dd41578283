//! Interpreter construction and compilation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, Module, Shared, AST};

use crate::config::ScriptSettings;
use crate::script::ScriptError;

/// How often (in operations) the progress callback checks the clock.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Compile a script without running it.
pub fn compile(source: &str) -> Result<AST, ScriptError> {
    Ok(Engine::new_raw().compile(source)?)
}

/// Deadline and cancellation flag for one evaluation.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Instant,
    cancel: Arc<AtomicBool>,
}

impl Budget {
    pub fn new(deadline: Instant, cancel: Arc<AtomicBool>) -> Self {
        Self { deadline, cancel }
    }

    fn exhausted(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || Instant::now() >= self.deadline
    }
}

/// Builds interpreters that share the standard library but nothing else.
#[derive(Clone)]
pub struct ScriptEngine {
    std: Shared<Module>,
    settings: ScriptSettings,
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ScriptEngine {
    pub fn new(settings: ScriptSettings) -> Self {
        Self {
            std: StandardPackage::new().as_shared_module(),
            settings,
        }
    }

    pub fn settings(&self) -> &ScriptSettings {
        &self.settings
    }

    /// A fresh interpreter with the standard library and the configured limits.
    pub fn interpreter(&self, budget: Option<Budget>) -> Engine {
        let mut engine = Engine::new_raw();
        engine.register_global_module(self.std.clone());
        engine
            .set_max_operations(self.settings.max_operations)
            .set_max_call_levels(self.settings.max_call_levels)
            .set_max_string_size(self.settings.max_string_size);

        engine.on_print(|text| tracing::info!(target: "script", "{}", text));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(target: "script", source = source.unwrap_or(""), position = %pos, "{}", text)
        });

        if let Some(budget) = budget {
            engine.on_progress(move |ops| {
                if ops % DEADLINE_CHECK_INTERVAL == 0 && budget.exhausted() {
                    Some(Dynamic::from("budget exhausted".to_string()))
                } else {
                    None
                }
            });
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn compile_reports_syntax_errors() {
        assert!(compile("let x = 1 + 2;").is_ok());
        assert!(matches!(compile("let = ;"), Err(ScriptError::Parse(_))));
    }

    #[test]
    fn interpreter_has_standard_library() {
        let engine = ScriptEngine::new(ScriptSettings::default()).interpreter(None);
        let n: i64 = engine.eval(r#"[3, 1, 2].len() + "abc".len()"#).unwrap();
        assert_eq!(n, 6);
    }

    #[test]
    fn operation_limit_stops_runaway_scripts() {
        let settings = ScriptSettings {
            max_operations: 10_000,
            ..ScriptSettings::default()
        };
        let engine = ScriptEngine::new(settings).interpreter(None);
        assert!(engine.run("loop { }").is_err());
    }

    #[test]
    fn cancelled_budget_terminates() {
        let settings = ScriptSettings {
            max_operations: 0,
            ..ScriptSettings::default()
        };
        let cancel = Arc::new(AtomicBool::new(true));
        let budget = Budget::new(Instant::now() + Duration::from_secs(60), cancel);
        let engine = ScriptEngine::new(settings).interpreter(Some(budget));
        let err = engine.run("loop { }").unwrap_err();
        assert!(matches!(ScriptError::from_eval(err), ScriptError::Terminated));
    }
}
