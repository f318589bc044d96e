//! Stepweave CLI entry point.
//!
//! Binary name: `sweave`
//!
//! Parses CLI arguments, loads configuration, opens the run database, then
//! dispatches to the matching command handler.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;

use cli::workflow::OutputMode;
use cli::{Cli, Commands};
use state::AppState;
use stepweave_core::repository::WorkflowRunRepository;
use stepweave_infra::config::{load_orchestrator_config, resolve_data_dir};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stepweave=debug",
        _ => "trace",
    };
    stepweave_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let config = load_orchestrator_config(&data_dir).await;

    let code = if cli.ephemeral {
        let state = AppState::ephemeral(config);
        dispatch(cli, &state).await
    } else {
        let state = AppState::init(config, &data_dir).await?;
        dispatch(cli, &state).await
    };

    stepweave_observe::tracing_setup::shutdown_tracing();
    code
}

async fn dispatch<R: WorkflowRunRepository + 'static>(
    cli: Cli,
    state: &AppState<R>,
) -> anyhow::Result<ExitCode> {
    let mode = OutputMode {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Run { file, vars } => cli::workflow::run_workflow(state, &file, vars, mode).await,

        Commands::Validate { file } => cli::workflow::validate_workflow(state, &file, mode),

        Commands::Resume { run_id, file } => {
            cli::workflow::resume_workflow(state, run_id, &file, mode).await
        }

        Commands::Graph { file, vars } => cli::workflow::run_graph(state, &file, vars, mode).await,

        Commands::History { limit } => {
            cli::history::list_runs(state, limit, cli.json).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Stats => {
            cli::history::show_stats(state, cli.json).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Decisions { workflow, limit } => {
            cli::history::list_decisions(state, workflow.as_deref(), limit, cli.json).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
