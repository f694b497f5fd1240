//! Pion build executor.
//!
//! Pipeline: evaluate pion.rhai → build the rule graph → seed targets →
//! discover/execute over the worker pool → report.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;

use pion::cache::Cache;
use pion::cli::{BuildArgs, Cli, Command};
use pion::graph::RuleGraph;
use pion::state::BuildState;
use pion::verbose::Timer;
use pion::{config, dprintln, engine, executor, verbose};

fn main() -> Result<()> {
    let cli = Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    match cli.command {
        Command::Build(ref args) => cmd_build(&cli, args),
        Command::List => cmd_list(),
        Command::Clean => cmd_clean(&cli),
    }
}

/// Build the requested targets.
fn cmd_build(cli: &Cli, args: &BuildArgs) -> Result<()> {
    let root = config::find_project_root()?;

    dprintln!("Loading {}...", config::SCRIPT_NAME);
    let model = {
        let _t = Timer::start("script evaluation");
        engine::load_model(&root)?
    };
    let graph = Arc::new(RuleGraph::build(&model)?);

    let mut targets = Vec::new();
    for name in &args.targets {
        let Some(id) = graph.rule_for(name) else {
            bail!("unknown target '{name}'");
        };
        if !targets.contains(&id) {
            targets.push(id);
        }
    }

    let cache = Cache::new(config::cache_dir(&root, cli.cache_dir.as_deref()));
    let sources: HashSet<String> = model.sources.iter().cloned().collect();
    let state = Arc::new(BuildState::new(
        root,
        sources,
        cache,
        cli.force,
        graph.len(),
    ));

    let summary = executor::run_build(&graph, &state, &targets, cli.jobs.unwrap_or(0))?;
    println!(
        "\nBuild complete. ({} of {} rules executed, {} from cache)",
        summary.executed, summary.scheduled, summary.cached
    );
    Ok(())
}

/// List the rules declared in pion.rhai.
fn cmd_list() -> Result<()> {
    let root = config::find_project_root()?;
    let model = engine::load_model(&root)?;

    for rule in &model.rules {
        let name = rule.name.as_deref().unwrap_or("<anonymous>");
        println!("{name}");
        for output in &rule.outputs {
            println!("  -> {output}");
        }
    }
    println!("\n{} rules, {} source files.", model.rules.len(), model.sources.len());
    Ok(())
}

/// Remove the artifact cache.
fn cmd_clean(cli: &Cli) -> Result<()> {
    let root = config::find_project_root()?;
    let dir = config::cache_dir(&root, cli.cache_dir.as_deref());
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
        println!("Removed {}", dir.display());
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}
