//! Rhai scripting engine for rule declarations.
//!
//! Sets up a Rhai engine with the declaration API, evaluates `pion.rhai`,
//! and produces a [`BuildModel`]. Rule actions are Rhai functions left in
//! the compiled AST; they are wrapped as [`Action`]s and called by name
//! later, with the action context exposed as a script-side object.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};
use walkdir::WalkDir;

use crate::action::{Action, ActionError, CtxRef};
use crate::config::SCRIPT_NAME;
use crate::model::{BuildModel, RuleSpec};

/// Rule declarations accumulated during script evaluation.
#[derive(Default, Clone)]
struct ScriptModel {
    rules: Vec<ScriptRule>,
    sources: BTreeSet<String>,
}

#[derive(Clone)]
struct ScriptRule {
    name: String,
    dir: String,
    deps: Vec<String>,
    outputs: Vec<String>,
    handler: String,
}

/// Shared model state captured by the registration closures.
type SharedModel = Arc<Mutex<ScriptModel>>;

/// Evaluate `pion.rhai` from the project root and return the populated model.
pub fn load_model(root: &Path) -> Result<BuildModel> {
    let script = root.join(SCRIPT_NAME);
    let shared: SharedModel = Arc::new(Mutex::new(ScriptModel::default()));

    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);

    register_declaration_api(&mut engine, shared.clone(), root);
    register_ctx_api(&mut engine);

    let ast = engine
        .compile_file(script.clone().into())
        .map_err(|e| anyhow!("error compiling {}: {e}", script.display()))?;
    engine
        .run_ast_with_scope(&mut Scope::new(), &ast)
        .map_err(|e| anyhow!("error evaluating {}: {e}", script.display()))?;

    let script_model = shared.lock().unwrap().clone();
    let engine = Arc::new(engine);
    let ast = Arc::new(ast);

    let mut model = BuildModel {
        rules: Vec::new(),
        sources: script_model.sources,
    };
    for rule in script_model.rules {
        if !ast.iter_functions().any(|f| f.name == rule.handler) {
            bail!(
                "rule '{}': action function '{}' is not defined in {}",
                rule.name,
                rule.handler,
                script.display()
            );
        }
        model.rules.push(Arc::new(RuleSpec {
            name: Some(rule.name),
            dir: rule.dir,
            deps: rule.deps,
            outputs: rule.outputs,
            action: Arc::new(RhaiAction {
                engine: engine.clone(),
                ast: ast.clone(),
                fn_name: rule.handler,
            }),
        }));
    }

    Ok(model)
}

// ---------------------------------------------------------------------------
// Declaration API: source(), source_dir(), rule() -> RuleBuilder
// ---------------------------------------------------------------------------

/// Returned by `rule()` for chained configuration.
#[derive(Clone)]
struct RuleBuilder {
    model: SharedModel,
    index: usize,
}

fn register_declaration_api(engine: &mut Engine, model: SharedModel, root: &Path) {
    let m = model.clone();
    engine.register_fn("source", move |path: &str| {
        m.lock().unwrap().sources.insert(path.into());
    });

    let m = model.clone();
    let root_dir = root.to_path_buf();
    engine.register_fn("source_dir", move |dir: &str| {
        let mut model = m.lock().unwrap();
        for entry in WalkDir::new(root_dir.join(dir))
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&root_dir) {
                model.sources.insert(rel.to_string_lossy().into_owned());
            }
        }
    });

    let m = model.clone();
    engine.register_fn(
        "rule",
        move |name: &str, deps: rhai::Array, outputs: rhai::Array, action: &str| -> RuleBuilder {
            let mut model = m.lock().unwrap();
            let index = model.rules.len();
            model.rules.push(ScriptRule {
                name: name.into(),
                dir: String::new(),
                deps: deps
                    .into_iter()
                    .filter_map(|v| v.into_string().ok())
                    .collect(),
                outputs: outputs
                    .into_iter()
                    .filter_map(|v| v.into_string().ok())
                    .collect(),
                handler: action.into(),
            });
            RuleBuilder {
                model: m.clone(),
                index,
            }
        },
    );

    engine.register_fn("dir", |builder: &mut RuleBuilder, dir: &str| -> RuleBuilder {
        builder.model.lock().unwrap().rules[builder.index].dir = dir.into();
        builder.clone()
    });
}

// ---------------------------------------------------------------------------
// Action invocation
// ---------------------------------------------------------------------------

/// An [`Action`] backed by a Rhai function in the build script.
struct RhaiAction {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    fn_name: String,
}

impl Action for RhaiAction {
    fn invoke(&self, ctx: &CtxRef) -> Result<(), ActionError> {
        let pending: PendingSignal = Arc::new(Mutex::new(None));
        let handle = Ctx {
            inner: ctx.clone(),
            pending: pending.clone(),
        };
        let mut scope = Scope::new();
        let result =
            self.engine
                .call_fn::<Dynamic>(&mut scope, &self.ast, &self.fn_name, (handle,));
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                // A context signal unwound the script; hand it back intact.
                if let Some(signal) = pending.lock().unwrap().take() {
                    return Err(signal);
                }
                Err(ActionError::Failed(anyhow!(
                    "action '{}' failed: {err}",
                    self.fn_name
                )))
            }
        }
    }
}

type PendingSignal = Arc<Mutex<Option<ActionError>>>;

/// Script-side view of an action context.
#[derive(Clone)]
struct Ctx {
    inner: CtxRef,
    pending: PendingSignal,
}

impl Ctx {
    /// Convert a context result into a Rhai unwind, stashing the signal so
    /// [`RhaiAction::invoke`] can recover it after the script aborts.
    fn intercept<T>(&mut self, result: Result<T, ActionError>) -> Result<T, Box<EvalAltResult>> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let message = err.to_string();
                *self.pending.lock().unwrap() = Some(err);
                Err(message.into())
            }
        }
    }
}

fn register_ctx_api(engine: &mut Engine) {
    engine.register_fn(
        "run_shell",
        |ctx: &mut Ctx, command: &str| -> Result<(), Box<EvalAltResult>> {
            let result = ctx.inner.lock().unwrap().run_shell(command);
            ctx.intercept(result)
        },
    );

    engine.register_fn(
        "add_dep",
        |ctx: &mut Ctx, path: &str| -> Result<(), Box<EvalAltResult>> {
            let result = ctx
                .inner
                .lock()
                .unwrap()
                .declare_dependency(&[path.to_string()]);
            ctx.intercept(result)
        },
    );

    engine.register_fn(
        "add_deps",
        |ctx: &mut Ctx, paths: rhai::Array| -> Result<(), Box<EvalAltResult>> {
            let paths: Vec<String> = paths
                .into_iter()
                .filter_map(|v| v.into_string().ok())
                .collect();
            let result = ctx.inner.lock().unwrap().declare_dependency(&paths);
            ctx.intercept(result)
        },
    );

    engine.register_fn(
        "read",
        |ctx: &mut Ctx, path: &str| -> Result<rhai::Blob, Box<EvalAltResult>> {
            let result = ctx.inner.lock().unwrap().read_input(Some(path), None);
            ctx.intercept(result)
        },
    );

    engine.register_fn(
        "read_text",
        |ctx: &mut Ctx, path: &str| -> Result<String, Box<EvalAltResult>> {
            let result = ctx.inner.lock().unwrap().read_input(Some(path), None);
            let bytes = ctx.intercept(result)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        },
    );

    engine.register_fn(
        "shell_text",
        |ctx: &mut Ctx, command: &str| -> Result<String, Box<EvalAltResult>> {
            let result = ctx.inner.lock().unwrap().read_input(None, Some(command));
            let bytes = ctx.intercept(result)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        },
    );
}
