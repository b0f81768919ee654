//! Datacat kernel command-line entry point.
//!
//! Usage:
//!   datacat reconcile
//!   datacat job create datacat.ext.geo:import_geo_dataset --arg 7 --run
//!   datacat worker

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use datacat_kernel::cli;
use datacat_kernel::config::Config;
use datacat_kernel::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install, enable, upgrade and disable plugins to match configuration.
    Reconcile,

    /// Inspect and manage plugins.
    #[command(subcommand)]
    Plugin(PluginCommand),

    /// Create, run and inspect background jobs.
    #[command(subcommand)]
    Job(JobCommand),

    /// Job log maintenance.
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Consume the job queue until interrupted.
    Worker,
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List configured plugins and their status.
    List,

    /// List routes and tasks declared by plugins.
    Routes,

    /// Uninstall a plugin that is no longer configured.
    Uninstall { name: String },
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    /// Create a job for a runner reference.
    Create {
        runner: String,

        /// Positional argument as JSON. Repeatable.
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Keyword argument as key=JSON. Repeatable.
        #[arg(long = "kwarg")]
        kwargs: Vec<String>,

        /// Dispatch immediately instead of only storing the definition.
        #[arg(long)]
        run: bool,
    },

    /// Run an existing job in this process.
    Run { job_id: Uuid },

    /// Show a job definition and its status.
    Show { job_id: Uuid },

    /// List the runs of a job.
    Runs { job_id: Uuid },

    /// Delete a job with its runs and logs.
    Delete { job_id: Uuid },

    /// Delete a single run with its logs.
    DeleteRun { run_id: Uuid },

    /// Print the log records of a run.
    Logs { run_id: Uuid },
}

#[derive(Subcommand, Debug)]
enum LogsCommand {
    /// Delete job log records past their retention.
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    info!(plugins = config.plugins.len(), "configuration loaded");

    let runtime = Runtime::connect(&config)
        .await
        .context("failed to initialize runtime")?;

    match args.command {
        Command::Reconcile => cli::cmd_reconcile(&runtime).await,
        Command::Plugin(cmd) => match cmd {
            PluginCommand::List => cli::cmd_plugin_list(&runtime).await,
            PluginCommand::Routes => cli::cmd_plugin_routes(&runtime),
            PluginCommand::Uninstall { name } => cli::cmd_plugin_uninstall(&runtime, &name).await,
        },
        Command::Job(cmd) => match cmd {
            JobCommand::Create {
                runner,
                args,
                kwargs,
                run,
            } => cli::cmd_job_create(&runtime, &runner, &args, &kwargs, run).await,
            JobCommand::Run { job_id } => cli::cmd_job_run(&runtime, job_id).await,
            JobCommand::Show { job_id } => cli::cmd_job_show(&runtime, job_id).await,
            JobCommand::Runs { job_id } => cli::cmd_job_runs(&runtime, job_id).await,
            JobCommand::Delete { job_id } => cli::cmd_job_delete(&runtime, job_id).await,
            JobCommand::DeleteRun { run_id } => cli::cmd_job_delete_run(&runtime, run_id).await,
            JobCommand::Logs { run_id } => cli::cmd_job_logs(&runtime, run_id).await,
        },
        Command::Logs(LogsCommand::Cleanup) => cli::cmd_logs_cleanup(&runtime).await,
        Command::Worker => {
            // Serving work requires reconciled plugin state.
            runtime.start().await?;
            cli::cmd_worker(&runtime).await
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
