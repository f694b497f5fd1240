//! Action capability interface.
//!
//! A rule's action is opaque to the core: it is invoked with a context and
//! calls back through it to run shell commands, declare dependencies, and
//! read inputs. The discovery engine selects one of two conforming context
//! implementations — preview (no side effects) or real.

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;

/// Signals raised by an action context.
///
/// The first three variants are recoverable control flow, not failures: the
/// discovery engine maps them onto [`Discovery`](crate::discover::Discovery)
/// outcomes. Only [`ActionError::Failed`] is fatal.
#[derive(Debug)]
pub enum ActionError {
    /// A dependency resolves to a rule that has not completed yet.
    NotReady(String),
    /// A dynamically discovered input could not be read.
    MissingDynamic(String),
    /// A memoized shell value was absent during preview.
    CacheMiss,
    /// The action itself failed.
    Failed(anyhow::Error),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady(path) => write!(f, "dependency '{path}' is not ready"),
            Self::MissingDynamic(path) => write!(f, "dynamic dependency '{path}' cannot be read"),
            Self::CacheMiss => write!(f, "memoized value not cached"),
            Self::Failed(err) => err.fmt(f),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err)
    }
}

/// The capability surface an action may call back into.
///
/// `read_input` takes exactly one of `file` (a path to fetch) or `shell_key`
/// (a command whose output is memoized under the running hash state).
pub trait ActionContext: Send {
    fn run_shell(&mut self, command: &str) -> Result<(), ActionError>;
    fn declare_dependency(&mut self, paths: &[String]) -> Result<(), ActionError>;
    fn read_input(
        &mut self,
        file: Option<&str>,
        shell_key: Option<&str>,
    ) -> Result<Vec<u8>, ActionError>;
}

/// Shared handle to an action context, as handed to [`Action::invoke`].
pub type CtxRef = Arc<Mutex<dyn ActionContext>>;

/// An opaque rule action.
pub trait Action: Send + Sync {
    fn invoke(&self, ctx: &CtxRef) -> Result<(), ActionError>;
}

/// Adapter turning a plain function into an [`Action`].
///
/// The script loader wraps Rhai functions instead; this adapter serves
/// embedders and the test suite, which build rule tables without a script.
pub struct FnAction<F>(pub F);

impl<F> Action for FnAction<F>
where
    F: Fn(&mut dyn ActionContext) -> Result<(), ActionError> + Send + Sync,
{
    fn invoke(&self, ctx: &CtxRef) -> Result<(), ActionError> {
        let mut guard = ctx.lock().unwrap();
        (self.0)(&mut *guard)
    }
}
