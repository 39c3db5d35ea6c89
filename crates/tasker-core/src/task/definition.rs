//! Task definitions: the reusable, named program for a class of work.
//!
//! A definition is an ordered list of uniquely named steps plus a retry
//! ceiling. Steps are looked up by name for the current step and by position
//! for the next one.

use std::collections::HashSet;

use tasker_types::task::TaskInstance;
use thiserror::Error;

use super::step::{ActionError, Step, StepAction};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural problems with a task definition. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("missing task name")]
    MissingName,

    #[error("missing steps in task")]
    MissingSteps,

    #[error("missing step name at position {index}")]
    MissingStepName { index: usize },

    #[error("missing action for step '{step}'")]
    MissingAction { step: String },

    #[error("duplicate step name: '{0}'")]
    DuplicateStepName(String),

    #[error("max_retry must be >= 1")]
    InvalidMaxRetry,
}

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// Default retry ceiling for [`TaskDefinition::new`].
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// An ordered, named sequence of steps.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub steps: Vec<Step>,
    /// Ceiling on consecutive failures of the current step.
    pub max_retry: u32,
}

impl TaskDefinition {
    /// Start an empty definition with [`DEFAULT_MAX_RETRY`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    /// Append a step whose action is a closure or function.
    pub fn step<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut TaskInstance) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.steps.push(Step::from_fn(name, f));
        self
    }

    /// Append a step backed by a [`StepAction`] implementation.
    pub fn step_with(mut self, name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        self.steps.push(Step::new(name, action));
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Check the structural invariants.
    ///
    /// Order: steps present, name present, every step named and bound,
    /// step names unique, retry ceiling positive.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::MissingSteps);
        }

        if self.name.is_empty() {
            return Err(DefinitionError::MissingName);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(DefinitionError::MissingStepName { index });
            }
            if step.action.is_none() {
                return Err(DefinitionError::MissingAction {
                    step: step.name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DefinitionError::DuplicateStepName(step.name.clone()));
            }
        }

        if self.max_retry == 0 {
            return Err(DefinitionError::InvalidMaxRetry);
        }

        Ok(())
    }

    pub fn first_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Position of the step named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// The step after position `index`, or `None` at the end of the task.
    pub fn step_after(&self, index: usize) -> Option<&Step> {
        self.steps.get(index + 1)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
