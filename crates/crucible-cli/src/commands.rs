//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Apply database migrations
    Migrate,

    /// Inspect and drive the work queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Manage runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Cancel outstanding work
    Cancel {
        #[command(subcommand)]
        command: CancelCommands,
    },

    /// Task descriptor tooling
    Descriptor {
        #[command(subcommand)]
        command: DescriptorCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Claim the next item from a queue
    Next {
        /// Queue name
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Worker identity recorded on the claim
        #[arg(short, long)]
        worker: String,
    },

    /// List queued items
    List {
        /// Only items for this repository (owner/name)
        #[arg(short, long)]
        repository: Option<String>,

        #[arg(long, default_value_t = 0)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        per_page: i64,
    },

    /// Report claims older than the stale threshold
    Stale {
        /// Override the configured threshold, in seconds
        #[arg(long)]
        older_than: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum RunCommands {
    /// Record a run's terminal status
    Status {
        /// Run ID
        run_id: String,

        #[arg(long, conflicts_with = "failure", required_unless_present = "failure")]
        success: bool,

        #[arg(long)]
        failure: bool,
    },
}

#[derive(Subcommand)]
pub enum CancelCommands {
    /// Cancel a task and its outstanding runs
    Task { task_id: String },

    /// Cancel the task owning a run
    Run { run_id: String },

    /// Cancel every task of a submission
    Submission { submission_id: String },

    /// Cancel outstanding work for a branch
    Ref {
        /// Repository (owner/name)
        repository: String,

        /// Branch name
        ref_name: String,
    },
}

#[derive(Subcommand)]
pub enum DescriptorCommands {
    /// Validate a task descriptor
    Validate {
        /// Path to task.yml
        #[arg(default_value = "task.yml")]
        path: PathBuf,

        /// Repository configuration to apply
        #[arg(long)]
        repo_config: Option<PathBuf>,
    },

    /// Print the JSON schema
    Schema {
        /// Print the repository configuration schema instead
        #[arg(long)]
        repo_config: bool,
    },
}
