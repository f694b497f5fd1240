//! Runtime rule graph.
//!
//! The graph builder turns the loader's flat rule table into an arena of
//! [`RuntimeRule`]s addressed by integer handles, plus a target-resolution
//! table mapping every rule name and output path to its producer. The arena
//! is immutable once built; the per-invocation mutable link state lives in
//! [`BuildState`](crate::state::BuildState), indexed by the same handles.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::action::Action;
use crate::model::{BuildModel, RuleSpec};

/// Stable handle into the rule arena.
pub type RuleId = usize;

/// A rule instantiated for one build invocation.
pub struct RuntimeRule {
    /// Display name: the rule name, else its first output path.
    pub name: String,
    /// Working directory for shell commands, relative to the project root.
    pub dir: String,
    /// Declared dependency paths, in order.
    pub deps: Vec<String>,
    /// Declared output paths.
    pub outputs: Vec<String>,
    /// The action callback.
    pub action: Arc<dyn Action>,
}

impl fmt::Debug for RuntimeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRule")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("deps", &self.deps)
            .field("outputs", &self.outputs)
            .field("action", &"<action>")
            .finish()
    }
}

/// Arena of runtime rules plus the target-resolution table.
#[derive(Debug)]
pub struct RuleGraph {
    rules: Vec<RuntimeRule>,
    by_target: HashMap<String, RuleId>,
}

impl RuleGraph {
    /// Build the runtime graph from the loader output.
    ///
    /// Fails on duplicate producers, empty output lists, and declared
    /// dependencies that are neither known source files nor rule outputs.
    /// All of these are configuration errors, reported before any work runs.
    pub fn build(model: &BuildModel) -> Result<RuleGraph> {
        let mut rules: Vec<RuntimeRule> = Vec::new();
        let mut by_target: HashMap<String, RuleId> = HashMap::new();
        let mut by_identity: HashMap<*const RuleSpec, RuleId> = HashMap::new();

        for spec in &model.rules {
            // A spec listed more than once collapses to one runtime rule.
            let identity = Arc::as_ptr(spec);
            if by_identity.contains_key(&identity) {
                continue;
            }

            let name = display_name(spec);
            if spec.outputs.is_empty() {
                bail!("rule '{name}' declares no outputs");
            }

            let id = rules.len();
            by_identity.insert(identity, id);
            rules.push(RuntimeRule {
                name,
                dir: spec.dir.clone(),
                deps: spec.deps.clone(),
                outputs: spec.outputs.clone(),
                action: spec.action.clone(),
            });

            if let Some(rule_name) = &spec.name {
                register(&mut by_target, rule_name, id)?;
            }
            for output in &spec.outputs {
                if model.sources.contains(output) {
                    bail!("output '{output}' is also a registered source file");
                }
                register(&mut by_target, output, id)?;
            }
        }

        let graph = RuleGraph { rules, by_target };

        for rule in &graph.rules {
            for dep in &rule.deps {
                if model.sources.contains(dep) || graph.by_target.contains_key(dep) {
                    continue;
                }
                bail!(
                    "rule '{}': declared dependency '{dep}' is neither a known \
                     source file nor the output of any rule",
                    rule.name
                );
            }
        }

        Ok(graph)
    }

    pub fn rule(&self, id: RuleId) -> &RuntimeRule {
        &self.rules[id]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve a target name or output path to its producing rule.
    pub fn rule_for(&self, target: &str) -> Option<RuleId> {
        self.by_target.get(target).copied()
    }

    /// Iterate all rules with their handles.
    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &RuntimeRule)> {
        self.rules.iter().enumerate()
    }
}

/// Insert a target key, tolerating re-registration of the same rule (a rule
/// named after one of its own outputs) but rejecting a second producer.
fn register(by_target: &mut HashMap<String, RuleId>, key: &str, id: RuleId) -> Result<()> {
    match by_target.insert(key.to_string(), id) {
        Some(prev) if prev != id => {
            bail!("'{key}' is produced by more than one rule");
        }
        _ => Ok(()),
    }
}

fn display_name(spec: &RuleSpec) -> String {
    match &spec.name {
        Some(name) => name.clone(),
        None => spec.outputs.first().cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionError, FnAction};

    fn noop() -> Arc<dyn Action> {
        Arc::new(FnAction(|_: &mut dyn crate::action::ActionContext| {
            Ok::<(), ActionError>(())
        }))
    }

    fn spec(name: &str, deps: &[&str], outputs: &[&str]) -> Arc<RuleSpec> {
        Arc::new(RuleSpec {
            name: Some(name.to_string()),
            dir: String::new(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            action: noop(),
        })
    }

    #[test]
    fn lookup_by_name_and_output() {
        let model = BuildModel {
            rules: vec![spec("gen", &[], &["out/a"])],
            sources: Default::default(),
        };
        let graph = RuleGraph::build(&model).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.rule_for("gen"), Some(0));
        assert_eq!(graph.rule_for("out/a"), Some(0));
        assert_eq!(graph.rule_for("missing"), None);
    }

    #[test]
    fn repeated_spec_collapses_to_one_rule() {
        let shared = spec("gen", &[], &["out/a"]);
        let model = BuildModel {
            rules: vec![shared.clone(), shared],
            sources: Default::default(),
        };
        let graph = RuleGraph::build(&model).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn duplicate_output_is_rejected() {
        let model = BuildModel {
            rules: vec![spec("a", &[], &["same.out"]), spec("b", &[], &["same.out"])],
            sources: Default::default(),
        };
        let err = RuleGraph::build(&model).unwrap_err();
        assert!(err.to_string().contains("more than one rule"));
    }

    #[test]
    fn unresolvable_declared_dependency_is_rejected() {
        let model = BuildModel {
            rules: vec![spec("a", &["nope.txt"], &["a.out"])],
            sources: Default::default(),
        };
        let err = RuleGraph::build(&model).unwrap_err();
        assert!(err.to_string().contains("neither a known source file"));
    }

    #[test]
    fn source_and_rule_output_dependencies_resolve() {
        let mut sources = std::collections::BTreeSet::new();
        sources.insert("src/in.txt".to_string());
        let model = BuildModel {
            rules: vec![
                spec("a", &["src/in.txt"], &["a.out"]),
                spec("b", &["a.out"], &["b.out"]),
            ],
            sources,
        };
        assert!(RuleGraph::build(&model).is_ok());
    }

    #[test]
    fn output_colliding_with_source_is_rejected() {
        let mut sources = std::collections::BTreeSet::new();
        sources.insert("a.out".to_string());
        let model = BuildModel {
            rules: vec![spec("a", &[], &["a.out"])],
            sources,
        };
        let err = RuleGraph::build(&model).unwrap_err();
        assert!(err.to_string().contains("also a registered source file"));
    }

    #[test]
    fn empty_output_list_is_rejected() {
        let model = BuildModel {
            rules: vec![spec("a", &[], &[])],
            sources: Default::default(),
        };
        let err = RuleGraph::build(&model).unwrap_err();
        assert!(err.to_string().contains("declares no outputs"));
    }
}
