//! Two-phase dependency discovery.
//!
//! Computes a rule's fingerprint and authoritative input list with the
//! fewest possible side effects: declared dependencies are read and folded
//! first, then the action runs against a preview context that intercepts
//! shell commands, dynamic dependency declarations, and input reads. A
//! declared dependency whose producing rule has not completed aborts the
//! attempt; a stale dynamic reference or a memo miss merely makes it
//! inconclusive. Discovery never under-reports inputs.

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::action::{ActionContext, ActionError, CtxRef};
use crate::graph::{RuleGraph, RuleId};
use crate::state::BuildState;

/// Ordered, length-prefixed fold of every observed input record.
///
/// Each record is framed as `u64-le(len) || bytes`, so concatenated values
/// of different lengths can never collide.
pub struct InputHasher {
    inner: Sha256,
}

impl InputHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Fold one atomic record.
    pub fn record(&mut self, bytes: &[u8]) {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    pub fn record_str(&mut self, s: &str) {
        self.record(s.as_bytes());
    }

    /// Memo key for a shell-value read: a digest of the running hash state
    /// combined with a digest of the command string.
    pub fn memo_key(&self, command: &str) -> String {
        let state = self.inner.clone().finalize();
        let mut hasher = Sha256::new();
        hasher.update(state);
        hasher.update(Sha256::digest(command.as_bytes()));
        format!("{:x}", hasher.finalize())
    }

    /// Hex digest over everything recorded so far.
    pub fn finish(self) -> String {
        format!("{:x}", self.inner.finalize())
    }
}

impl Default for InputHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a discovery attempt.
pub enum Discovery {
    /// Every input was observable; the rule can be cache-checked or executed.
    Ready {
        fingerprint: String,
        inputs: Vec<String>,
    },
    /// A declared or dynamically declared dependency's producing rule has
    /// not completed. `inputs` is the accumulated list, ending with the
    /// dependency to wait on.
    NotReady { inputs: Vec<String> },
    /// A dynamic reference went stale or a memoized value was missing; the
    /// rule needs full re-execution, not a failure.
    Inconclusive,
}

/// Run discovery for one rule.
pub fn discover(graph: &Arc<RuleGraph>, state: &Arc<BuildState>, id: RuleId) -> Result<Discovery> {
    let rule = graph.rule(id);
    let mut hasher = InputHasher::new();
    let mut inputs = Vec::new();

    match fold_declared(graph, state, id, &mut hasher, &mut inputs) {
        Ok(()) => {}
        Err(ActionError::NotReady(_)) => {
            dedupe(&mut inputs);
            return Ok(Discovery::NotReady { inputs });
        }
        Err(ActionError::Failed(err)) => return Err(err),
        // The declared walk raises nothing else; treat defensively.
        Err(_) => return Ok(Discovery::Inconclusive),
    }

    let preview = Arc::new(Mutex::new(PreviewCtx {
        graph: graph.clone(),
        state: state.clone(),
        hasher,
        inputs,
    }));
    let ctx: CtxRef = preview.clone();
    let result = rule.action.invoke(&ctx);
    drop(ctx);
    let (hasher, mut inputs) = preview.lock().unwrap().take_outcome();
    dedupe(&mut inputs);

    match result {
        Ok(()) => Ok(Discovery::Ready {
            fingerprint: hasher.finish(),
            inputs,
        }),
        Err(ActionError::NotReady(_)) => Ok(Discovery::NotReady { inputs }),
        Err(ActionError::MissingDynamic(path)) => {
            crate::vprintln!("  {}: stale dynamic dependency '{path}'", rule.name);
            Ok(Discovery::Inconclusive)
        }
        Err(ActionError::CacheMiss) => Ok(Discovery::Inconclusive),
        Err(ActionError::Failed(err)) => {
            Err(err.context(format!("rule '{}' failed during discovery", rule.name)))
        }
    }
}

/// Walk a rule's declared dependencies in order, folding each into the hash
/// and the input list. A dependency produced by an unready rule aborts with
/// `NotReady`; an unreadable file is a hard error (declared dependencies are
/// validated at graph-build time, so the file is expected to exist).
///
/// Shared with real execution so both phases observe the identical record
/// sequence.
pub(crate) fn fold_declared(
    graph: &RuleGraph,
    state: &BuildState,
    id: RuleId,
    hasher: &mut InputHasher,
    inputs: &mut Vec<String>,
) -> Result<(), ActionError> {
    let rule = graph.rule(id);
    for dep in &rule.deps {
        if let Some(dep_id) = graph.rule_for(dep) {
            if !state.is_ready(dep_id) {
                inputs.push(dep.clone());
                return Err(ActionError::NotReady(dep.clone()));
            }
        }
        let path = state.root.join(dep);
        let bytes = fs::read(&path)
            .with_context(|| format!("reading declared dependency {}", path.display()))
            .map_err(ActionError::Failed)?;
        hasher.record_str(dep);
        hasher.record(&bytes);
        inputs.push(dep.clone());
    }
    Ok(())
}

/// Drop repeated paths, keeping first-occurrence order.
fn dedupe(inputs: &mut Vec<String>) {
    let mut seen = HashSet::new();
    inputs.retain(|path| seen.insert(path.clone()));
}

/// Non-side-effecting action context.
///
/// Shell commands fold without executing; dynamic dependencies fetch real
/// file content (reading is side-effect free); memoized shell values come
/// from the cache or abort the preview.
struct PreviewCtx {
    graph: Arc<RuleGraph>,
    state: Arc<BuildState>,
    hasher: InputHasher,
    inputs: Vec<String>,
}

impl PreviewCtx {
    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, ActionError> {
        if let Some(dep_id) = self.graph.rule_for(path) {
            if !self.state.is_ready(dep_id) {
                self.inputs.push(path.to_string());
                return Err(ActionError::NotReady(path.to_string()));
            }
        }
        match fs::read(self.state.root.join(path)) {
            Ok(bytes) => {
                self.hasher.record_str(path);
                self.hasher.record(&bytes);
                self.inputs.push(path.to_string());
                Ok(bytes)
            }
            Err(_) => Err(ActionError::MissingDynamic(path.to_string())),
        }
    }

    fn take_outcome(&mut self) -> (InputHasher, Vec<String>) {
        (
            std::mem::take(&mut self.hasher),
            std::mem::take(&mut self.inputs),
        )
    }
}

impl ActionContext for PreviewCtx {
    fn run_shell(&mut self, command: &str) -> Result<(), ActionError> {
        self.hasher.record_str(command);
        Ok(())
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
                let key = self.hasher.memo_key(command);
                let Some(value) = self.state.cache.get(&key) else {
                    return Err(ActionError::CacheMiss);
                };
                self.hasher.record_str(command);
                self.hasher.record(&value);
                Ok(value)
            }
            _ => Err(ActionError::Failed(anyhow::anyhow!(
                "read_input needs exactly one of file or shell_key"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_framing_distinguishes_splits() {
        // ("ab", "c") and ("a", "bc") must not collide.
        let mut h1 = InputHasher::new();
        h1.record_str("ab");
        h1.record_str("c");
        let mut h2 = InputHasher::new();
        h2.record_str("a");
        h2.record_str("bc");
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn identical_records_produce_identical_digests() {
        let mut h1 = InputHasher::new();
        let mut h2 = InputHasher::new();
        for h in [&mut h1, &mut h2] {
            h.record_str("cc -c main.c");
            h.record(b"\x00\x01binary");
        }
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn memo_key_depends_on_state_and_command() {
        let mut h1 = InputHasher::new();
        let h2 = InputHasher::new();
        assert_eq!(h1.memo_key("ls"), h2.memo_key("ls"));
        assert_ne!(h1.memo_key("ls"), h1.memo_key("ls -a"));

        h1.record_str("something");
        assert_ne!(h1.memo_key("ls"), h2.memo_key("ls"));
    }

    #[test]
    fn memo_key_does_not_disturb_the_running_state() {
        let mut h1 = InputHasher::new();
        let mut h2 = InputHasher::new();
        h1.record_str("x");
        h2.record_str("x");
        let _ = h1.memo_key("probe");
        assert_eq!(h1.finish(), h2.finish());
    }
}
