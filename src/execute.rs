//! Real action execution and result capture.
//!
//! The real context folds the identical record sequence the preview would,
//! while actually running shell commands and reading files, so the
//! fingerprint persisted here is exactly what the next invocation's preview
//! recomputes.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use crate::action::{ActionContext, ActionError, CtxRef};
use crate::cache;
use crate::discover::{self, InputHasher};
use crate::graph::{RuleGraph, RuleId, RuntimeRule};
use crate::shell;
use crate::state::BuildState;

/// Run a rule's action for real, persist its outputs under the observed
/// fingerprint, and return that fingerprint.
pub fn execute(graph: &Arc<RuleGraph>, state: &Arc<BuildState>, id: RuleId) -> Result<String> {
    let rule = graph.rule(id);

    let mut hasher = InputHasher::new();
    let mut inputs = Vec::new();
    discover::fold_declared(graph, state, id, &mut hasher, &mut inputs).map_err(|err| {
        match err {
            ActionError::Failed(e) => e,
            // Readiness is monotonic within an invocation; execution starts
            // only after discovery saw every declared dependency ready.
            other => anyhow!("rule '{}': {other}", rule.name),
        }
    })?;

    // Output directories exist before the action runs.
    for output in &rule.outputs {
        if let Some(parent) = state.root.join(output).parent() {
            fs::create_dir_all(parent)?;
        }
    }

    let real = Arc::new(Mutex::new(RealCtx {
        state: state.clone(),
        dir: state.root.join(&rule.dir),
        hasher,
        inputs,
    }));
    let ctx: CtxRef = real.clone();
    let result = rule.action.invoke(&ctx);
    drop(ctx);
    let (hasher, _inputs) = real.lock().unwrap().take_outcome();

    match result {
        Ok(()) => {}
        Err(ActionError::Failed(err)) => {
            return Err(err.context(format!("rule '{}' failed", rule.name)));
        }
        Err(other) => return Err(anyhow!("rule '{}': {other}", rule.name)),
    }

    let fingerprint = hasher.finish();
    let mut outputs = Vec::with_capacity(rule.outputs.len());
    for output in &rule.outputs {
        let path = state.root.join(output);
        let bytes = fs::read(&path).with_context(|| {
            format!("rule '{}' did not produce declared output {output}", rule.name)
        })?;
        outputs.push((output.clone(), bytes));
    }
    state
        .cache
        .put(&fingerprint, &cache::encode_outputs(&outputs))?;

    Ok(fingerprint)
}

/// Rewrite a rule's outputs from a cached value without invoking its action.
pub fn adopt(state: &BuildState, rule: &RuntimeRule, value: &[u8]) -> Result<()> {
    let outputs = cache::decode_outputs(value)
        .with_context(|| format!("corrupt cache entry for rule '{}'", rule.name))?;
    for (path, bytes) in outputs {
        let full = state.root.join(&path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, &bytes)
            .with_context(|| format!("restoring cached output {}", full.display()))?;
    }
    Ok(())
}

/// Side-effecting action context.
struct RealCtx {
    state: Arc<BuildState>,
    /// Absolute working directory for shell commands.
    dir: PathBuf,
    hasher: InputHasher,
    inputs: Vec<String>,
}

impl RealCtx {
    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, ActionError> {
        let full = self.state.root.join(path);
        let bytes = fs::read(&full)
            .with_context(|| format!("reading input {}", full.display()))
            .map_err(ActionError::Failed)?;
        self.hasher.record_str(path);
        self.hasher.record(&bytes);
        self.inputs.push(path.to_string());
        Ok(bytes)
    }

    fn take_outcome(&mut self) -> (InputHasher, Vec<String>) {
        (
            std::mem::take(&mut self.hasher),
            std::mem::take(&mut self.inputs),
        )
    }
}

impl ActionContext for RealCtx {
    fn run_shell(&mut self, command: &str) -> Result<(), ActionError> {
        self.hasher.record_str(command);
        shell::run(command, &self.dir).map_err(ActionError::Failed)
    }

    fn declare_dependency(&mut self, paths: &[String]) -> Result<(), ActionError> {
        for path in paths {
            self.fetch(path)?;
        }
        Ok(())
    }

    fn read_input(
        &mut self,
        file: Option<&str>,
        shell_key: Option<&str>,
    ) -> Result<Vec<u8>, ActionError> {
        match (file, shell_key) {
            (Some(path), None) => self.fetch(path),
            (None, Some(command)) => {
                // Same key derivation as the preview, from the same state.
                let key = self.hasher.memo_key(command);
                let value = shell::run_capture(command, &self.dir).map_err(ActionError::Failed)?;
                self.state
                    .cache
                    .put(&key, &value)
                    .map_err(ActionError::Failed)?;
                self.hasher.record_str(command);
                self.hasher.record(&value);
                Ok(value)
            }
            _ => Err(ActionError::Failed(anyhow!(
                "read_input needs exactly one of file or shell_key"
            ))),
        }
    }
}
