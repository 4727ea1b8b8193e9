//! Crucible CI operator CLI.

use clap::Parser;
use std::path::PathBuf;

mod commands;
mod config;
mod handlers;
mod logging;

use commands::{CancelCommands, Commands, DescriptorCommands, QueueCommands, RunCommands};
use config::CrucibleConfig;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(author, version, about = "Crucible CI command-line interface", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "crucible.yml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = CrucibleConfig::load(&cli.config)?;
    logging::init(&config.logging);
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Migrate => handlers::migrate(&config).await?,
        Commands::Queue { command } => match command {
            QueueCommands::Next { queue, worker } => {
                handlers::queue_next(&config, &queue, &worker).await?
            }
            QueueCommands::List {
                repository,
                page,
                per_page,
            } => handlers::queue_list(&config, repository.as_deref(), page, per_page).await?,
            QueueCommands::Stale { older_than } => {
                handlers::queue_stale(&config, older_than).await?
            }
        },
        Commands::Run { command } => match command {
            RunCommands::Status {
                run_id,
                success,
                failure: _,
            } => handlers::run_status(&config, &run_id, success).await?,
        },
        Commands::Cancel { command } => match command {
            CancelCommands::Task { task_id } => handlers::cancel_task(&config, &task_id).await?,
            CancelCommands::Run { run_id } => handlers::cancel_run(&config, &run_id).await?,
            CancelCommands::Submission { submission_id } => {
                handlers::cancel_submission(&config, &submission_id).await?
            }
            CancelCommands::Ref {
                repository,
                ref_name,
            } => handlers::cancel_ref(&config, &repository, &ref_name).await?,
        },
        Commands::Descriptor { command } => match command {
            DescriptorCommands::Validate { path, repo_config } => {
                handlers::validate_descriptor(&path, repo_config.as_deref())?
            }
            DescriptorCommands::Schema { repo_config } => handlers::print_schema(repo_config)?,
        },
    }

    Ok(())
}
