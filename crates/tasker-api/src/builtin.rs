//! Task definitions compiled into the `tasker` binary.
//!
//! - `greet`: `hello` -> `remember` -> `report`. Shows payload flowing between
//!   steps.
//! - `flaky`: `attempt` -> `finish`. `attempt` fails until it has been tried
//!   `args.succeed_after` times, which exercises the retry ceiling.

use serde::{Deserialize, Serialize};
use tasker_core::task::{ActionError, RegistryError, TaskDefinition, TaskRegistry};
use tasker_types::task::TaskInstance;

#[derive(Debug, Default, Deserialize)]
struct GreetArgs {
    who: Option<String>,
}

/// State `greet` carries from `remember` to `report`.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct GreetBuffer {
    user_address: String,
    node_id: u32,
}

#[derive(Debug, Default, Deserialize)]
struct FlakyArgs {
    succeed_after: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlakyProgress {
    attempts: u32,
}

const FLAKY_MAX_RETRY: u32 = 5;
const FLAKY_DEFAULT_SUCCEED_AFTER: u32 = 2;

fn hello(task: &mut TaskInstance) -> Result<(), ActionError> {
    let args: GreetArgs = task.args_as()?.unwrap_or_default();
    let who = args.who.unwrap_or_else(|| "world".to_string());
    tracing::info!(task_id = %task.id, "hello, {who}");
    Ok(())
}

fn remember(task: &mut TaskInstance) -> Result<(), ActionError> {
    let args: GreetArgs = task.args_as()?.unwrap_or_default();
    let buffer = GreetBuffer {
        user_address: args.who.unwrap_or_else(|| "world".to_string()),
        node_id: 4,
    };
    task.set_payload(&buffer)?;
    Ok(())
}

fn report(task: &mut TaskInstance) -> Result<(), ActionError> {
    let buffer: GreetBuffer = task
        .payload_as()?
        .ok_or("nothing remembered by a previous step")?;
    tracing::info!(
        task_id = %task.id,
        user_address = buffer.user_address.as_str(),
        node_id = buffer.node_id,
        "greeting delivered"
    );
    Ok(())
}

fn attempt(task: &mut TaskInstance) -> Result<(), ActionError> {
    let args: FlakyArgs = task.args_as()?.unwrap_or_default();
    let succeed_after = args.succeed_after.unwrap_or(FLAKY_DEFAULT_SUCCEED_AFTER);

    let mut progress: FlakyProgress = task.payload_as()?.unwrap_or_default();
    progress.attempts += 1;
    task.set_payload(&progress)?;

    if progress.attempts < succeed_after {
        return Err(ActionError::new(format!(
            "attempt {} of {succeed_after} failed",
            progress.attempts
        )));
    }
    Ok(())
}

fn finish(task: &mut TaskInstance) -> Result<(), ActionError> {
    tracing::info!(task_id = %task.id, "flaky task finished");
    Ok(())
}

pub fn greet() -> TaskDefinition {
    TaskDefinition::new("greet")
        .step("hello", hello)
        .step("remember", remember)
        .step("report", report)
}

pub fn flaky() -> TaskDefinition {
    TaskDefinition::new("flaky")
        .with_max_retry(FLAKY_MAX_RETRY)
        .step("attempt", attempt)
        .step("finish", finish)
}

/// Registry holding every built-in definition.
pub fn registry() -> Result<TaskRegistry, RegistryError> {
    let mut registry = TaskRegistry::new();
    registry.register(greet())?;
    registry.register(flaky())?;
    Ok(registry)
}
