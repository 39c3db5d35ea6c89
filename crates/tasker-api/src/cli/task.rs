//! Task instance subcommands: enqueue, list, show, delete.

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use tasker_core::repository::task::TaskRepository;
use tasker_types::task::{NewTask, TaskId, TaskInstance, TaskStatus};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

pub async fn enqueue(
    state: &AppState,
    name: String,
    args: Option<&str>,
    payload: Option<&str>,
    delay: u64,
    json: bool,
) -> Result<()> {
    if state.registry.get(&name).is_none() {
        bail!(
            "No task definition named '{name}'. Known definitions: {}",
            state.registry.names().join(", ")
        );
    }

    let args = args
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("Invalid JSON in --args")?;
    let payload = payload
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("Invalid JSON in --payload")?;
    let delay = i64::try_from(delay).context("--delay is too large")?;

    let task = state
        .repo
        .create(NewTask {
            name,
            due_at: Some(Utc::now() + Duration::seconds(delay)),
            args,
            payload,
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to enqueue task: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!();
        println!(
            "  {} Enqueued '{}'",
            style("*").green().bold(),
            style(&task.name).cyan()
        );
        println!("  ID: {}", task.id);
        println!("  Due: {}", task.due_at.to_rfc3339());
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, status: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let status = status
        .map(|s| s.parse::<TaskStatus>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;

    let tasks = state
        .repo
        .list(status, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list tasks: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!();
        println!("  No tasks found.");
        println!(
            "  Enqueue one with: {}",
            style("tasker enqueue greet").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Step"),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Due"),
        ]);

    for t in &tasks {
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.name),
            Cell::new(if t.current_step.is_empty() { "-" } else { t.current_step.as_str() }),
            status_cell(t.effective_status()),
            Cell::new(t.retry_count),
            Cell::new(t.due_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Todo => Color::Yellow,
        TaskStatus::Done => Color::Green,
        TaskStatus::Error => Color::Red,
    };
    Cell::new(status).fg(color)
}

// ---------------------------------------------------------------------------
// Show / Delete
// ---------------------------------------------------------------------------

fn parse_id(id: &str) -> Result<TaskId> {
    id.parse::<TaskId>()
        .with_context(|| format!("Invalid task ID '{id}'"))
}

async fn fetch(state: &AppState, id: &TaskId) -> Result<TaskInstance> {
    state
        .repo
        .get(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get task: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Task '{id}' not found"))
}

pub async fn show(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let task = fetch(state, &id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
        return Ok(());
    }

    let steps = state
        .registry
        .get(&task.name)
        .map(|d| d.step_names().join(" -> "))
        .unwrap_or_else(|| "(no registered definition)".to_string());

    println!();
    println!("  {} {}", style("Task").bold(), style(&task.name).cyan());
    println!("  ID:       {}", task.id);
    println!("  Status:   {}", task.effective_status());
    println!(
        "  Step:     {}",
        if task.current_step.is_empty() { "(not started)" } else { task.current_step.as_str() }
    );
    println!("  Retries:  {}", task.retry_count);
    println!("  Steps:    {steps}");
    println!("  Due:      {}", task.due_at.to_rfc3339());
    println!("  Created:  {}", task.created_at.to_rfc3339());
    if let Some(args) = &task.args {
        println!("  Args:     {args}");
    }
    if let Some(payload) = &task.payload {
        println!("  Payload:  {payload}");
    }
    println!();

    Ok(())
}

pub async fn delete(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let deleted = state
        .repo
        .delete(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to delete task: {e}"))?;

    if !deleted {
        bail!("Task '{id}' not found");
    }

    if json {
        println!("{}", serde_json::json!({ "id": id.to_string(), "deleted": true }));
    } else {
        println!();
        println!("  {} Deleted task {}", style("*").green().bold(), id);
        println!();
    }

    Ok(())
}
