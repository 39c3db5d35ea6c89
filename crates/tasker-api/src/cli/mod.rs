//! CLI command definitions and dispatch for the `tasker` binary.

pub mod scheduler;
pub mod task;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Durable linear-step task runner.
#[derive(Parser)]
#[command(name = "tasker", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a task instance for a registered definition.
    Enqueue {
        /// Definition name (see `tasker definitions`).
        name: String,

        /// JSON arguments available to the steps.
        #[arg(long)]
        args: Option<String>,

        /// Initial JSON payload.
        #[arg(long)]
        payload: Option<String>,

        /// Seconds from now until the task becomes due.
        #[arg(long, default_value = "0")]
        delay: u64,
    },

    /// List task instances.
    #[command(alias = "ls")]
    List {
        /// Filter by status (todo, done, error).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of tasks to display.
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Show one task instance.
    Show {
        /// Task ID.
        id: String,
    },

    /// Delete a task instance.
    #[command(alias = "rm")]
    Delete {
        /// Task ID.
        id: String,
    },

    /// Run a single scheduler cycle and print what happened.
    Tick,

    /// Run the scheduler until Ctrl+C or SIGTERM.
    Run {
        /// Seconds between poll cycles (overrides config.toml).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// List the task definitions built into this binary.
    Definitions,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
