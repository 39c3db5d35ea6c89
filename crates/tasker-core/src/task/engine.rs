//! Execution engine: advances one task instance through its definition's steps.
//!
//! One invocation runs as far as is safe, then returns:
//!
//! 1. Validate the definition and default the instance (`current_step` to
//!    the first step, empty `status` to `todo`).
//! 2. Resolve `current_step` by name and execute its action.
//! 3. On success, move to the next step by position and keep going; the last
//!    step's success marks the instance `done`.
//! 4. On failure, bump `retry_count` and stop, so the next attempt waits for
//!    the next poll. Once `retry_count + 1 >= max_retry` the run reports
//!    [`EngineError::RetryExhausted`] instead and leaves `status` alone.
//!
//! The engine never persists anything. Callers that want a write per step
//! transition pass a [`TransitionObserver`] to [`ExecutionEngine::run_observed`].

use tasker_types::task::{TaskInstance, TaskStatus};
use thiserror::Error;

use super::definition::{DefinitionError, TaskDefinition};

// ---------------------------------------------------------------------------
// Outcome / error types
// ---------------------------------------------------------------------------

/// What an engine invocation did, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every remaining step succeeded; the instance is now `done`.
    Completed,
    /// The current step failed with retries left; `retry_count` was bumped.
    Retrying { step: String, retry_count: u32, reason: String },
    /// The action rewrote `current_step`; resolution happens next invocation.
    Redirected { from: String, to: String },
    /// The instance was already `done` or `error`; nothing ran.
    AlreadyTerminal(TaskStatus),
}

/// Engine-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid task definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("task instance is missing")]
    NilInstance,

    #[error("step '{step}' not found in task '{task}'")]
    StepNotFound { task: String, step: String },

    #[error("reached max retry for step '{step}' after {attempts} attempts: {reason}")]
    RetryExhausted {
        step: String,
        attempts: u32,
        reason: String,
    },
}

impl EngineError {
    /// Whether the scheduler should mark the instance `error`.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, EngineError::RetryExhausted { .. })
    }
}

// ---------------------------------------------------------------------------
// TransitionObserver
// ---------------------------------------------------------------------------

/// Hook called after every in-memory step transition (advance or completion).
pub trait TransitionObserver {
    fn on_transition(&mut self, task: &TaskInstance);
}

/// Observer that ignores every transition.
pub struct NoopObserver;

impl TransitionObserver for NoopObserver {
    fn on_transition(&mut self, _task: &TaskInstance) {}
}

impl<F: FnMut(&TaskInstance)> TransitionObserver for F {
    fn on_transition(&mut self, task: &TaskInstance) {
        self(task)
    }
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Stateless step-advancement engine.
pub struct ExecutionEngine;

impl ExecutionEngine {
    /// Run `task` against `definition` without a transition observer.
    pub fn run(
        definition: &TaskDefinition,
        task: Option<&mut TaskInstance>,
    ) -> Result<RunOutcome, EngineError> {
        Self::run_observed(definition, task, &mut NoopObserver)
    }

    /// Run `task` against `definition`, reporting each transition to `observer`.
    pub fn run_observed(
        definition: &TaskDefinition,
        task: Option<&mut TaskInstance>,
        observer: &mut impl TransitionObserver,
    ) -> Result<RunOutcome, EngineError> {
        definition.validate()?;
        let task = task.ok_or(EngineError::NilInstance)?;

        // Terminal instances are left exactly as they were loaded.
        let status = task.effective_status();
        if status.is_terminal() {
            tracing::debug!(task_id = %task.id, %status, "task already terminal, nothing to run");
            return Ok(RunOutcome::AlreadyTerminal(status));
        }

        if task.current_step.is_empty() {
            // validate() guarantees at least one step.
            if let Some(first) = definition.first_step() {
                task.current_step = first.name.clone();
            }
        }
        if task.status.is_none() {
            task.status = Some(TaskStatus::Todo);
        }

        let mut index = definition
            .position(&task.current_step)
            .ok_or_else(|| EngineError::StepNotFound {
                task: definition.name.clone(),
                step: task.current_step.clone(),
            })?;

        loop {
            let step = &definition.steps[index];
            let action = step.action.as_ref().ok_or_else(|| {
                DefinitionError::MissingAction {
                    step: step.name.clone(),
                }
            })?;

            tracing::debug!(task_id = %task.id, step = step.name.as_str(), "executing step");

            if let Err(e) = action.execute(task) {
                let attempts = task.retry_count.saturating_add(1);
                if attempts >= definition.max_retry {
                    tracing::warn!(
                        task_id = %task.id,
                        step = step.name.as_str(),
                        attempts,
                        error = %e,
                        "step failed, retries exhausted"
                    );
                    return Err(EngineError::RetryExhausted {
                        step: step.name.clone(),
                        attempts,
                        reason: e.to_string(),
                    });
                }

                task.retry_count = attempts;
                tracing::warn!(
                    task_id = %task.id,
                    step = step.name.as_str(),
                    retry_count = task.retry_count,
                    max_retry = definition.max_retry,
                    error = %e,
                    "step failed, will retry next cycle"
                );
                return Ok(RunOutcome::Retrying {
                    step: step.name.clone(),
                    retry_count: task.retry_count,
                    reason: e.to_string(),
                });
            }

            if task.current_step != step.name {
                tracing::debug!(
                    task_id = %task.id,
                    from = step.name.as_str(),
                    to = task.current_step.as_str(),
                    "step redirected flow"
                );
                return Ok(RunOutcome::Redirected {
                    from: step.name.clone(),
                    to: task.current_step.clone(),
                });
            }

            match definition.step_after(index) {
                Some(next) => {
                    tracing::debug!(
                        task_id = %task.id,
                        from = step.name.as_str(),
                        to = next.name.as_str(),
                        "advancing to next step"
                    );
                    task.current_step = next.name.clone();
                    index += 1;
                    observer.on_transition(task);
                }
                None => {
                    task.status = Some(TaskStatus::Done);
                    tracing::debug!(task_id = %task.id, step = step.name.as_str(), "reached end of task");
                    observer.on_transition(task);
                    return Ok(RunOutcome::Completed);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
