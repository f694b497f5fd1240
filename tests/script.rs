//! End-to-end tests driving builds from a `pion.rhai` fixture.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pion::cache::Cache;
use pion::config::SCRIPT_NAME;
use pion::executor::{self, BuildSummary};
use pion::graph::RuleGraph;
use pion::state::BuildState;
use pion::{config, engine};
use tempfile::TempDir;

const SCRIPT: &str = r#"
source("f1.txt");
source("manifest.txt");

rule("copy", ["f1.txt"], ["out/copy.txt"], "do_copy");
rule("upper", ["out/copy.txt"], ["out/upper.txt"], "do_upper");
rule("bundle", ["manifest.txt"], ["out/bundle.txt"], "do_bundle");
rule("scan", [], ["out/scan.txt"], "do_scan");

fn do_copy(ctx) {
    ctx.run_shell("cp f1.txt out/copy.txt");
}

fn do_upper(ctx) {
    ctx.run_shell("tr a-z A-Z < out/copy.txt > out/upper.txt");
}

fn do_bundle(ctx) {
    let manifest = ctx.read_text("manifest.txt");
    let cmd = "cat manifest.txt";
    for line in manifest.split("\n") {
        if line != "" {
            ctx.add_dep(line);
            cmd += " " + line;
        }
    }
    ctx.run_shell(cmd + " > out/bundle.txt");
}

fn do_scan(ctx) {
    let listing = ctx.shell_text("ls *.txt");
    ctx.run_shell("ls *.txt > out/scan.txt");
}
"#;

fn setup() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(SCRIPT_NAME), SCRIPT).unwrap();
    fs::write(tmp.path().join("f1.txt"), "payload\n").unwrap();
    fs::write(tmp.path().join("manifest.txt"), "extra.txt\n").unwrap();
    fs::write(tmp.path().join("extra.txt"), "extra v1\n").unwrap();
    tmp
}

/// One full invocation: fresh model, graph, and state over a shared cache.
fn build(root: &Path, targets: &[&str]) -> anyhow::Result<BuildSummary> {
    let model = engine::load_model(root)?;
    let graph = Arc::new(RuleGraph::build(&model)?);
    let ids: Vec<_> = targets
        .iter()
        .map(|t| graph.rule_for(t).expect("known target"))
        .collect();
    let state = Arc::new(BuildState::new(
        root.to_path_buf(),
        model.sources.iter().cloned().collect(),
        Cache::new(config::cache_dir(root, None)),
        false,
        graph.len(),
    ));
    executor::run_build(&graph, &state, &ids, 2)
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn scripted_chain_builds_and_caches() {
    let tmp = setup();

    let summary = build(tmp.path(), &["upper"]).unwrap();
    assert_eq!(summary.executed, 2);
    assert_eq!(read(tmp.path(), "out/upper.txt"), "PAYLOAD\n");

    let summary = build(tmp.path(), &["upper"]).unwrap();
    assert_eq!(summary.executed, 0);
    assert_eq!(summary.cached, 2);

    fs::write(tmp.path().join("f1.txt"), "fresh payload\n").unwrap();
    let summary = build(tmp.path(), &["upper"]).unwrap();
    assert_eq!(summary.executed, 2);
    assert_eq!(read(tmp.path(), "out/upper.txt"), "FRESH PAYLOAD\n");
}

#[test]
fn scripted_dynamic_dependencies_are_tracked() {
    let tmp = setup();

    let summary = build(tmp.path(), &["bundle"]).unwrap();
    assert_eq!(summary.executed, 1);
    assert_eq!(
        read(tmp.path(), "out/bundle.txt"),
        "extra.txt\nextra v1\n"
    );

    let summary = build(tmp.path(), &["bundle"]).unwrap();
    assert_eq!(summary.cached, 1);

    // extra.txt was discovered through add_dep; changing it alone must
    // invalidate the fingerprint.
    fs::write(tmp.path().join("extra.txt"), "extra v2\n").unwrap();
    let summary = build(tmp.path(), &["bundle"]).unwrap();
    assert_eq!(summary.executed, 1);
    assert_eq!(
        read(tmp.path(), "out/bundle.txt"),
        "extra.txt\nextra v2\n"
    );
}

#[test]
fn scripted_memoized_shell_read_enables_caching() {
    let tmp = setup();

    let summary = build(tmp.path(), &["scan"]).unwrap();
    assert_eq!(summary.executed, 1);
    assert!(read(tmp.path(), "out/scan.txt").contains("f1.txt"));

    // The preview replays `ls` from the memo instead of running it.
    let summary = build(tmp.path(), &["scan"]).unwrap();
    assert_eq!(summary.cached, 1);
}
