//! CLI command definitions for the `conductor` binary.

pub mod queue;
pub mod runs;
pub mod schedule;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operate the Conductor workflow runtime.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a conductor.toml (defaults to the data directory).
    #[arg(long, global = true, env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler, publishing each due job to the queue until Ctrl-C.
    Schedule,

    /// Publish a workflow run request to the queue.
    Enqueue {
        /// Workflow id or definition path.
        workflow: String,

        /// Delivery priority: high, normal, or low.
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Run input as key=value (value parsed as JSON when possible).
        #[arg(long = "input", short = 'i')]
        input: Vec<String>,
    },

    /// Number of pending messages in the queue.
    #[command(name = "queue-length")]
    QueueLength,

    /// Inspect workflow runs.
    Runs {
        #[command(subcommand)]
        action: RunsCommand,
    },

    /// Aggregate run statistics.
    Stats {
        /// Restrict to one workflow id.
        #[arg(long)]
        workflow: Option<String>,
    },

    /// Delete runs (and their checkpoints) older than N days.
    Cleanup {
        #[arg(long)]
        days: u32,
    },
}

#[derive(Subcommand)]
pub enum RunsCommand {
    /// List runs, newest first.
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        workflow: Option<String>,

        /// pending, running, completed, failed, or cancelled.
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one run with its step checkpoints.
    Show { run_id: String },

    /// Step index a resumed run would start from.
    #[command(name = "resume-point")]
    ResumePoint { run_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_enqueue_with_inputs() {
        let cli = Cli::try_parse_from([
            "conductor", "enqueue", "nightly", "--priority", "high", "-i", "a=1", "--input", "b=x",
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue {
                workflow,
                priority,
                input,
            } => {
                assert_eq!(workflow, "nightly");
                assert_eq!(priority, "high");
                assert_eq!(input, vec!["a=1", "b=x"]);
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["conductor", "runs", "show", "r1", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Runs {
                action: RunsCommand::Show { .. }
            }
        ));
    }

    #[test]
    fn cleanup_requires_days() {
        assert!(Cli::try_parse_from(["conductor", "cleanup"]).is_err());
    }
}
