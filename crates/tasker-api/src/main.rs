//! Tasker CLI entry point.
//!
//! Binary name: `tasker`
//!
//! Parses CLI arguments, sets up tracing, opens the task database and
//! dispatches to the command handlers.

mod builtin;
mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,tasker=debug",
        _ => "trace",
    };
    tasker_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tasker", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Enqueue {
            name,
            args,
            payload,
            delay,
        } => {
            cli::task::enqueue(
                &state,
                name,
                args.as_deref(),
                payload.as_deref(),
                delay,
                cli.json,
            )
            .await
        }
        Commands::List { status, limit } => {
            cli::task::list(&state, status.as_deref(), limit, cli.json).await
        }
        Commands::Show { id } => cli::task::show(&state, &id, cli.json).await,
        Commands::Delete { id } => cli::task::delete(&state, &id, cli.json).await,
        Commands::Tick => cli::scheduler::tick(&state, cli.json).await,
        Commands::Run { interval } => cli::scheduler::run(&state, interval, cli.quiet).await,
        Commands::Definitions => cli::scheduler::definitions(&state, cli.json),
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    tasker_observe::tracing_setup::shutdown_tracing();
    result
}

/// Wait for Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
