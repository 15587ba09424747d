//! Conductor operator entry point.
//!
//! Binary name: `conductor`
//!
//! Parses CLI arguments, loads configuration and opens the database, then
//! dispatches to the matching command handler.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands, RunsCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = conductor_observe::tracing_setup::init_tracing(
        cli.otel,
        conductor_observe::tracing_setup::directive_for_verbosity(cli.verbose),
    ) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let state = AppState::init(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Schedule => cli::schedule::run_scheduler(&state).await,

        Commands::Enqueue {
            workflow,
            priority,
            input,
        } => cli::queue::enqueue(&state, &workflow, &priority, &input, cli.json).await,

        Commands::QueueLength => cli::queue::queue_length(&state, cli.json).await,

        Commands::Runs { action } => match action {
            RunsCommand::List {
                workflow,
                status,
                limit,
            } => cli::runs::list_runs(&state, workflow, status.as_deref(), limit, cli.json).await,
            RunsCommand::Show { run_id } => cli::runs::show_run(&state, &run_id, cli.json).await,
            RunsCommand::ResumePoint { run_id } => {
                cli::runs::resume_point(&state, &run_id, cli.json).await
            }
        },

        Commands::Stats { workflow } => cli::runs::stats(&state, workflow.as_deref(), cli.json).await,

        Commands::Cleanup { days } => cli::runs::cleanup(&state, days, cli.json).await,
    };

    conductor_observe::tracing_setup::shutdown_tracing();
    result
}
