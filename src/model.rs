//! Loader-output contract types.
//!
//! These are pure data handed from the script loader (or an embedder) to the
//! graph builder: a flat rule table plus the set of known source files.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::action::Action;

/// A single declared rule.
#[derive(Clone)]
pub struct RuleSpec {
    /// Optional unique rule name, usable as a build target.
    pub name: Option<String>,
    /// Working directory for the action's shell commands, relative to the
    /// project root. Empty means the root itself.
    pub dir: String,
    /// Declared dependency paths, in order. Each must be a known source file
    /// or another rule's output/name.
    pub deps: Vec<String>,
    /// Output paths. At least one; each produced by exactly this rule.
    pub outputs: Vec<String>,
    /// The opaque action callback.
    pub action: Arc<dyn Action>,
}

impl fmt::Debug for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSpec")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("deps", &self.deps)
            .field("outputs", &self.outputs)
            .field("action", &"<action>")
            .finish()
    }
}

/// The complete loader output consumed by the graph builder.
#[derive(Default, Clone, Debug)]
pub struct BuildModel {
    /// Flat rule table. A rule referenced more than once collapses to a
    /// single runtime rule by `Arc` identity.
    pub rules: Vec<Arc<RuleSpec>>,
    /// Repository-relative paths of known source files.
    pub sources: BTreeSet<String>,
}
