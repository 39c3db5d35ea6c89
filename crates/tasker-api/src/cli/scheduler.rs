//! Scheduler subcommands: tick, run, definitions.

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio_util::sync::CancellationToken;

use tasker_core::task::CycleReport;

use crate::state::AppState;

/// Run exactly one poll cycle.
pub async fn tick(state: &AppState, json: bool) -> Result<()> {
    let scheduler = state.scheduler(state.config.scheduler.clone());
    let report = scheduler
        .run_cycle(Utc::now())
        .await
        .map_err(|e| anyhow::anyhow!("Scheduler cycle failed: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    println!();
    if report.due == 0 {
        println!("  No tasks due.");
        println!();
        return;
    }

    println!(
        "  {} Dispatched {} due task(s)",
        style("*").green().bold(),
        report.due
    );
    let rows = [
        ("completed", report.completed),
        ("retrying", report.retrying),
        ("redirected", report.redirected),
        ("already terminal", report.already_terminal),
        ("exhausted", report.exhausted),
        ("engine errors", report.engine_errors),
        ("unmatched", report.unmatched),
        ("dead-lettered", report.dead_lettered),
        ("panicked", report.panicked),
        ("save failures", report.save_failures),
    ];
    for (label, count) in rows.iter().filter(|(_, c)| *c > 0) {
        println!("    {label:<17} {count}");
    }
    println!();
}

/// Run the scheduler loop until a shutdown signal arrives.
pub async fn run(state: &AppState, interval: Option<u64>, quiet: bool) -> Result<()> {
    let mut config = state.config.scheduler.clone();
    if let Some(secs) = interval {
        config.poll_interval_secs = secs;
    }

    let scheduler = state.scheduler(config);
    let cancel = CancellationToken::new();

    if !quiet {
        println!();
        println!(
            "  {} Scheduler running (every {}s, {} definitions). Press Ctrl+C to stop.",
            style("*").green().bold(),
            scheduler.config().poll_interval_secs,
            scheduler.registry().len()
        );
        println!("  Data: {}", style(state.data_dir.display()).dim());
        println!();
    }

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        crate::shutdown_signal().await;
        signal_cancel.cancel();
    });

    scheduler.run(cancel).await;

    if !quiet {
        println!("\n  Scheduler stopped.");
    }
    Ok(())
}

/// List the built-in definitions.
pub fn definitions(state: &AppState, json: bool) -> Result<()> {
    let defs: Vec<_> = state
        .registry
        .names()
        .into_iter()
        .filter_map(|name| state.registry.get(&name))
        .collect();

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "steps": d.step_names(),
                    "max_retry": d.max_retry,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Steps"),
            Cell::new("Max retry"),
        ]);

    for d in &defs {
        table.add_row(vec![
            Cell::new(&d.name),
            Cell::new(d.step_names().join(" -> ")),
            Cell::new(d.max_retry),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}
