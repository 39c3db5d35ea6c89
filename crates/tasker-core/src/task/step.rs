//! Steps: named units of work bound to a task instance.
//!
//! A step's action is anything implementing [`StepAction`]. Plain closures of
//! the shape `Fn(&mut TaskInstance) -> Result<(), ActionError>` qualify, so
//! definitions can be declared inline without a struct per step.

use std::fmt;
use std::sync::Arc;

use tasker_types::task::TaskInstance;

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

/// A step action's failure reason. Counts against the definition's retry
/// ceiling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for ActionError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("payload codec error: {e}"))
    }
}

// ---------------------------------------------------------------------------
// StepAction
// ---------------------------------------------------------------------------

/// The executable body of a step.
///
/// Actions run synchronously and may read and write `payload`. They must not
/// touch `retry_count` or `status`. Setting `current_step` is allowed as a
/// redirect; the engine re-resolves it on the next invocation.
pub trait StepAction: Send + Sync {
    fn execute(&self, task: &mut TaskInstance) -> Result<(), ActionError>;
}

impl<F> StepAction for F
where
    F: Fn(&mut TaskInstance) -> Result<(), ActionError> + Send + Sync,
{
    fn execute(&self, task: &mut TaskInstance) -> Result<(), ActionError> {
        self(task)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A named step in a task definition.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    /// `None` only for definitions still being assembled; validation rejects it.
    pub action: Option<Arc<dyn StepAction>>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            action: Some(Arc::new(action)),
        }
    }

    /// A step whose action is a closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut TaskInstance) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::new(name, f)
    }

    /// A step with no action bound yet.
    pub fn unbound(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("bound", &self.action.is_some())
            .finish()
    }
}
