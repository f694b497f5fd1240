//! Worker pool and build coordination.
//!
//! The coordinator seeds the requested targets, spawns a fixed pool of
//! worker threads over the shared queue, and blocks on the join barrier.
//! Workers drive each dequeued rule through discovery → cache check →
//! execution → completion. After shutdown, a recorded failure is re-raised;
//! otherwise any rules left scheduled-but-not-ready mean a dependency cycle.

use std::sync::Arc;
use std::thread;

use anyhow::{Result, bail};

use crate::discover::{self, Discovery};
use crate::execute;
use crate::graph::{RuleGraph, RuleId};
use crate::state::BuildState;
use crate::{dprintln, vprintln};

/// Outcome counters for one build invocation.
#[derive(Debug)]
pub struct BuildSummary {
    /// Rules that entered the schedule.
    pub scheduled: usize,
    /// Rules completed by executing their action.
    pub executed: usize,
    /// Rules completed by cache adoption.
    pub cached: usize,
}

/// Run a build for `targets` with `jobs` worker threads (0 = auto-detect).
pub fn run_build(
    graph: &Arc<RuleGraph>,
    state: &Arc<BuildState>,
    targets: &[RuleId],
    jobs: usize,
) -> Result<BuildSummary> {
    let workers = match jobs {
        0 => thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        n => n,
    };

    for &target in targets {
        state.schedule_target(target);
    }

    thread::scope(|scope| {
        for _ in 0..workers {
            let graph = Arc::clone(graph);
            let state = Arc::clone(state);
            scope.spawn(move || worker_loop(&graph, &state));
        }

        // Wait until every queued and in-flight item has settled, then
        // release the workers.
        state.queue.join();
        for _ in 0..workers {
            state.queue.push_shutdown();
        }
    });

    if let Some(err) = state.take_failure() {
        return Err(err);
    }

    let stuck = state.stuck_rules();
    if !stuck.is_empty() {
        let start = targets
            .iter()
            .copied()
            .find(|target| stuck.contains(target))
            .unwrap_or(stuck[0]);
        let chain = state.trace_cycle(graph, start);
        bail!("dependency cycle detected: {}", chain.join(" -> "));
    }

    state.manifest.lock().unwrap().save(state.cache.dir())?;

    Ok(BuildSummary {
        scheduled: state.progress.scheduled(),
        executed: state.progress.executed(),
        cached: state.progress.cached(),
    })
}

fn worker_loop(graph: &Arc<RuleGraph>, state: &Arc<BuildState>) {
    while let Some(rule) = state.queue.pop() {
        // After a fatal failure the queue is drained without processing.
        if state.has_failure() {
            state.queue.task_done();
            continue;
        }
        if let Err(err) = process_rule(graph, state, rule) {
            state.record_failure(err);
        }
        state.queue.task_done();
    }
}

/// Drive one dequeued rule through discovery, cache check, and execution.
fn process_rule(graph: &Arc<RuleGraph>, state: &Arc<BuildState>, id: RuleId) -> Result<()> {
    let rule = graph.rule(id);
    match discover::discover(graph, state, id)? {
        Discovery::NotReady { inputs } => {
            let waiting = state.enqueue_deps(graph, id, &inputs, true)?;
            if !waiting {
                // Every dependency completed between discovery and
                // registration; try again immediately.
                state.queue.push(id);
            }
            Ok(())
        }
        Discovery::Ready { fingerprint, .. } => {
            if state.force {
                return run_action(graph, state, id, "forced rebuild");
            }
            match state.cache.get(&fingerprint) {
                Some(value) => {
                    execute::adopt(state, rule, &value)?;
                    vprintln!("  {} unchanged (cache)", rule.name);
                    state.progress.note_cached();
                    finish(state, id, &rule.name, &fingerprint);
                    Ok(())
                }
                None => {
                    let reason = {
                        let manifest = state.manifest.lock().unwrap();
                        match manifest.rules.get(&rule.name) {
                            Some(prev) if *prev != fingerprint => "observed inputs changed",
                            Some(_) => "cache entry missing",
                            None => "not previously built",
                        }
                    };
                    run_action(graph, state, id, reason)
                }
            }
        }
        Discovery::Inconclusive => run_action(graph, state, id, "dynamic dependencies inconclusive"),
    }
}

fn run_action(
    graph: &Arc<RuleGraph>,
    state: &Arc<BuildState>,
    id: RuleId,
    reason: &str,
) -> Result<()> {
    let rule = graph.rule(id);
    dprintln!("  Building {}...", rule.name);
    vprintln!("  stale: {} — {reason}", rule.name);
    let fingerprint = execute::execute(graph, state, id)?;
    state.progress.note_executed();
    finish(state, id, &rule.name, &fingerprint);
    Ok(())
}

/// Record the fingerprint and wake dependents. Runs exactly once per rule.
fn finish(state: &BuildState, id: RuleId, name: &str, fingerprint: &str) {
    state
        .manifest
        .lock()
        .unwrap()
        .rules
        .insert(name.to_string(), fingerprint.to_string());
    state.complete(id);
}
