//! Shared build state and scheduler primitives.
//!
//! One [`BuildState`] exists per build invocation and is shared by every
//! worker thread. A single coarse scheduling mutex guards the ready set, the
//! scheduled-but-not-ready set, and the per-rule link vectors; contention is
//! low relative to action execution time. Nothing here outlives the
//! invocation except what the cache persisted to disk.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::cache::{Cache, CacheManifest};
use crate::graph::{RuleGraph, RuleId};
use crate::progress::Progress;
use crate::queue::JobQueue;

/// All state shared across workers for one invocation.
pub struct BuildState {
    /// Project root; all rule paths are relative to it.
    pub root: PathBuf,
    /// Known source-file paths.
    pub sources: HashSet<String>,
    /// Content-addressed artifact store.
    pub cache: Cache,
    /// Bypass cache lookups (still records results).
    pub force: bool,
    /// Work queue feeding the worker pool.
    pub queue: JobQueue,
    /// Status counters.
    pub progress: Progress,
    /// Diagnostic fingerprints from the previous invocation.
    pub manifest: Mutex<CacheManifest>,
    sched: Mutex<SchedState>,
    failure: Mutex<Option<anyhow::Error>>,
}

/// Everything guarded by the scheduling lock. The per-rule vectors are
/// arena-parallel to the rule graph.
struct SchedState {
    /// Rules whose outputs are valid for this invocation.
    ready: HashSet<RuleId>,
    /// Rules that entered the schedule and have not completed yet.
    scheduled: HashSet<RuleId>,
    /// Per rule: the unready dependencies it is still waiting on.
    remaining: Vec<HashSet<RuleId>>,
    /// Per rule: every dependency it ever waited on; kept for cycle tracing.
    pending: Vec<HashSet<RuleId>>,
    /// Per rule: the rules to wake when it completes.
    dependents: Vec<Vec<RuleId>>,
}

impl BuildState {
    pub fn new(
        root: PathBuf,
        sources: HashSet<String>,
        cache: Cache,
        force: bool,
        rule_count: usize,
    ) -> Self {
        let manifest = if force {
            CacheManifest::new()
        } else {
            CacheManifest::load(cache.dir())
        };
        Self {
            root,
            sources,
            cache,
            force,
            queue: JobQueue::new(),
            progress: Progress::default(),
            manifest: Mutex::new(manifest),
            sched: Mutex::new(SchedState {
                ready: HashSet::new(),
                scheduled: HashSet::new(),
                remaining: vec![HashSet::new(); rule_count],
                pending: vec![HashSet::new(); rule_count],
                dependents: vec![Vec::new(); rule_count],
            }),
            failure: Mutex::new(None),
        }
    }

    /// Whether a rule has completed in this invocation.
    pub fn is_ready(&self, id: RuleId) -> bool {
        self.sched.lock().unwrap().ready.contains(&id)
    }

    /// Seed a requested target into the schedule.
    ///
    /// Returns `false` if it was already scheduled or completed.
    pub fn schedule_target(&self, id: RuleId) -> bool {
        let mut sched = self.sched.lock().unwrap();
        if sched.ready.contains(&id) || !sched.scheduled.insert(id) {
            return false;
        }
        self.progress.add_scheduled(1);
        self.queue.push(id);
        true
    }

    /// Register `rule`'s interest in every unready dependency among `paths`,
    /// scheduling dependencies that are not queued yet.
    ///
    /// Returns whether `rule` has to wait. The whole read-modify-write runs
    /// under the scheduling lock so overlapping dependency sets registered
    /// from different threads cannot lose updates.
    ///
    /// Unknown paths fail unless `tolerate_unknown` — dynamic dependency
    /// lists may reference files that no longer exist.
    pub fn enqueue_deps(
        &self,
        graph: &RuleGraph,
        rule: RuleId,
        paths: &[String],
        tolerate_unknown: bool,
    ) -> Result<bool> {
        let mut sched = self.sched.lock().unwrap();
        let mut waiting = false;
        for path in paths {
            if self.sources.contains(path) {
                continue;
            }
            let Some(dep) = graph.rule_for(path) else {
                if tolerate_unknown {
                    continue;
                }
                bail!("'{path}' is neither a known source file nor the output of any rule");
            };
            if sched.ready.contains(&dep) {
                continue;
            }
            waiting = true;
            if sched.scheduled.insert(dep) {
                self.progress.add_scheduled(1);
                self.queue.push(dep);
            }
            if sched.remaining[rule].insert(dep) {
                sched.dependents[dep].push(rule);
            }
            sched.pending[rule].insert(dep);
        }
        Ok(waiting)
    }

    /// Mark a rule complete: move it into `ready` and wake dependents whose
    /// remaining set drains.
    pub fn complete(&self, rule: RuleId) {
        let mut sched = self.sched.lock().unwrap();
        sched.ready.insert(rule);
        sched.scheduled.remove(&rule);
        let dependents = std::mem::take(&mut sched.dependents[rule]);
        for dependent in dependents {
            sched.remaining[dependent].remove(&rule);
            if sched.remaining[dependent].is_empty() {
                self.queue.push(dependent);
            }
        }
    }

    /// Record a fatal failure. Only the first one is kept.
    pub fn record_failure(&self, err: anyhow::Error) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn has_failure(&self) -> bool {
        self.failure.lock().unwrap().is_some()
    }

    pub fn take_failure(&self) -> Option<anyhow::Error> {
        self.failure.lock().unwrap().take()
    }

    /// Rules that entered the schedule but never completed.
    pub fn stuck_rules(&self) -> Vec<RuleId> {
        let sched = self.sched.lock().unwrap();
        let mut stuck: Vec<RuleId> = sched.scheduled.iter().copied().collect();
        stuck.sort_unstable();
        stuck
    }

    /// Trace a dependency cycle among stuck rules, starting from `start`.
    ///
    /// Follows one still-unready pending dependency at a time until a rule
    /// repeats; the repeated rule closes the chain.
    pub fn trace_cycle(&self, graph: &RuleGraph, start: RuleId) -> Vec<String> {
        let sched = self.sched.lock().unwrap();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = start;
        loop {
            chain.push(graph.rule(current).name.clone());
            if !seen.insert(current) {
                break;
            }
            let next = sched.pending[current]
                .iter()
                .copied()
                .find(|dep| !sched.ready.contains(dep));
            match next {
                Some(dep) => current = dep,
                None => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionContext, ActionError, FnAction};
    use crate::model::{BuildModel, RuleSpec};
    use std::sync::Arc;

    fn noop() -> Arc<dyn Action> {
        Arc::new(FnAction(|_: &mut dyn ActionContext| {
            Ok::<(), ActionError>(())
        }))
    }

    /// Chain c -> b -> a (c depends on b's output, b on a's).
    fn chain_graph() -> RuleGraph {
        let rule = |name: &str, deps: &[&str], out: &str| {
            Arc::new(RuleSpec {
                name: Some(name.to_string()),
                dir: String::new(),
                deps: deps.iter().map(|s| s.to_string()).collect(),
                outputs: vec![out.to_string()],
                action: noop(),
            })
        };
        let model = BuildModel {
            rules: vec![
                rule("a", &[], "a.out"),
                rule("b", &["a.out"], "b.out"),
                rule("c", &["b.out"], "c.out"),
            ],
            sources: Default::default(),
        };
        RuleGraph::build(&model).unwrap()
    }

    fn state_for(graph: &RuleGraph) -> BuildState {
        BuildState::new(
            PathBuf::from("/nonexistent"),
            HashSet::new(),
            Cache::new(PathBuf::from("/nonexistent/cache")),
            true, // skip manifest load
            graph.len(),
        )
    }

    #[test]
    fn schedule_target_is_idempotent() {
        let graph = chain_graph();
        let state = state_for(&graph);
        assert!(state.schedule_target(0));
        assert!(!state.schedule_target(0));
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.progress.scheduled(), 1);
    }

    #[test]
    fn enqueue_deps_schedules_and_links() {
        let graph = chain_graph();
        let state = state_for(&graph);
        let b = graph.rule_for("b").unwrap();
        let a = graph.rule_for("a").unwrap();

        let waiting = state
            .enqueue_deps(&graph, b, &["a.out".to_string()], false)
            .unwrap();
        assert!(waiting);
        assert_eq!(state.queue.len(), 1);

        // A second dependent on the same unready rule is linked, not re-queued.
        let c = graph.rule_for("c").unwrap();
        let waiting = state
            .enqueue_deps(&graph, c, &["a.out".to_string()], false)
            .unwrap();
        assert!(waiting);
        assert_eq!(state.queue.len(), 1);

        // Completing `a` wakes both dependents.
        state.complete(a);
        assert!(state.is_ready(a));
        assert_eq!(state.queue.len(), 3);
    }

    #[test]
    fn ready_dependencies_do_not_block() {
        let graph = chain_graph();
        let state = state_for(&graph);
        let a = graph.rule_for("a").unwrap();
        let b = graph.rule_for("b").unwrap();
        state.complete(a);

        let waiting = state
            .enqueue_deps(&graph, b, &["a.out".to_string()], false)
            .unwrap();
        assert!(!waiting);
        assert!(state.queue.is_empty());
    }

    #[test]
    fn source_paths_are_skipped() {
        let graph = chain_graph();
        let mut state = state_for(&graph);
        state.sources.insert("src/f.txt".to_string());
        let b = graph.rule_for("b").unwrap();

        let waiting = state
            .enqueue_deps(&graph, b, &["src/f.txt".to_string()], false)
            .unwrap();
        assert!(!waiting);
    }

    #[test]
    fn unknown_paths_fail_unless_tolerated() {
        let graph = chain_graph();
        let state = state_for(&graph);
        let b = graph.rule_for("b").unwrap();

        let err = state
            .enqueue_deps(&graph, b, &["ghost.txt".to_string()], false)
            .unwrap_err();
        assert!(err.to_string().contains("ghost.txt"));

        let waiting = state
            .enqueue_deps(&graph, b, &["ghost.txt".to_string()], true)
            .unwrap();
        assert!(!waiting);
    }

    #[test]
    fn cycle_trace_names_every_rule() {
        // a -> b -> c -> a, registered the way workers would.
        let rule = |name: &str, dep: &str, out: &str| {
            Arc::new(RuleSpec {
                name: Some(name.to_string()),
                dir: String::new(),
                deps: vec![dep.to_string()],
                outputs: vec![out.to_string()],
                action: noop(),
            })
        };
        let model = BuildModel {
            rules: vec![
                rule("a", "b.out", "a.out"),
                rule("b", "c.out", "b.out"),
                rule("c", "a.out", "c.out"),
            ],
            sources: Default::default(),
        };
        let graph = RuleGraph::build(&model).unwrap();
        let state = state_for(&graph);
        let (a, b, c) = (0, 1, 2);
        state.schedule_target(a);
        state.enqueue_deps(&graph, a, &["b.out".to_string()], true).unwrap();
        state.enqueue_deps(&graph, b, &["c.out".to_string()], true).unwrap();
        state.enqueue_deps(&graph, c, &["a.out".to_string()], true).unwrap();

        let chain = state.trace_cycle(&graph, a);
        assert_eq!(chain, vec!["a", "b", "c", "a"]);
        assert_eq!(state.stuck_rules(), vec![a, b, c]);
    }
}
