//! Incremental, concurrent build executor.
//!
//! Given a graph of named rules — each producing output artifacts from
//! declared and dynamically-discovered inputs — pion determines which rules
//! are stale, runs only those on a worker pool, caches results under a
//! fingerprint of every input the rule actually observed, and diagnoses
//! dependency cycles.
//!
//! The crate is usable as a library: build a [`model::BuildModel`] (from
//! [`engine::load_model`] or by hand), turn it into a [`graph::RuleGraph`],
//! and run [`executor::run_build`] against a fresh [`state::BuildState`].

pub mod action;
pub mod cache;
pub mod cli;
pub mod config;
pub mod discover;
pub mod engine;
pub mod execute;
pub mod executor;
pub mod graph;
pub mod model;
pub mod progress;
pub mod queue;
pub mod shell;
pub mod state;
pub mod verbose;
