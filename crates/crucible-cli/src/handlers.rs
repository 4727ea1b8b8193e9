//! Command handlers.

use crate::config::CrucibleConfig;
use anyhow::{Context, bail};
use console::style;
use crucible_core::descriptor::{self, RepoConfig, TaskSettings};
use crucible_core::ids::{RunId, SubmissionId, TaskId};
use crucible_core::naming;
use crucible_core::ports::Stores;
use crucible_core::run::QueueItem;
use crucible_db::Database;
use crucible_scheduler::StaleClaimWatchdog;
use std::path::Path;
use std::time::Duration;

async fn connect(config: &CrucibleConfig) -> anyhow::Result<Database> {
    Database::connect(&config.database)
        .await
        .context("failed to connect to the database")
}

async fn stores(config: &CrucibleConfig) -> anyhow::Result<Stores> {
    Ok(connect(config).await?.stores())
}

/// Apply pending migrations.
pub async fn migrate(config: &CrucibleConfig) -> anyhow::Result<()> {
    connect(config).await?.migrate().await?;
    println!("{} Migrations applied", style("✓").green());
    Ok(())
}

/// Claim the next queue item for a worker.
pub async fn queue_next(config: &CrucibleConfig, queue: &str, worker: &str) -> anyhow::Result<()> {
    let stores = stores(config).await?;

    match stores.queue.dequeue_next(queue, worker).await? {
        Some(item) => {
            println!("{} Claimed {}", style("✓").green(), style(&item.run.name).bold());
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        None => println!("{} Queue {} is empty", style("!").yellow(), queue),
    }
    Ok(())
}

/// List queue items, optionally for one repository.
fn page_offset(page: i64, per_page: i64) -> anyhow::Result<i64> {
    if per_page <= 0 || page < 0 {
        bail!("page must be >= 0 and per-page > 0");
    }
    let Some(offset) = page.checked_mul(per_page) else {
        bail!("page {page} is out of range");
    };
    Ok(offset)
}

pub async fn queue_list(
    config: &CrucibleConfig,
    repository: Option<&str>,
    page: i64,
    per_page: i64,
) -> anyhow::Result<()> {
    let offset = page_offset(page, per_page)?;
    let stores = stores(config).await?;

    let items = match repository {
        Some(name) => {
            naming::owner_repo(name)?;
            stores
                .queue
                .list_for_repository(name, per_page, offset)
                .await?
        }
        None => stores.queue.list(per_page, offset).await?,
    };
    let total = stores.queue.count().await?;

    if items.is_empty() {
        println!("No queued items");
        return Ok(());
    }

    println!(
        "{:<10} {:<40} {:<12} {:<10} {}",
        style("RUN").bold(),
        style("NAME").bold(),
        style("QUEUE").bold(),
        style("STATE").bold(),
        style("WORKER").bold()
    );
    for item in &items {
        print_item(item);
    }
    println!("\n{} of {} items", items.len(), total);
    Ok(())
}

fn print_item(item: &QueueItem) {
    let state = if item.running {
        style("running").cyan()
    } else {
        style("queued").dim()
    };
    println!(
        "{:<10} {:<40} {:<12} {:<10} {}",
        item.run.id.get(),
        item.run.name,
        item.queue_name,
        state,
        item.running_on.as_deref().unwrap_or("-")
    );
}

/// Report claims older than the threshold.
pub async fn queue_stale(config: &CrucibleConfig, older_than: Option<u64>) -> anyhow::Result<()> {
    let stores = stores(config).await?;
    let threshold = older_than
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.scheduler.stale_claim());

    let stale = StaleClaimWatchdog::new(stores.queue, threshold).scan().await?;

    if stale.is_empty() {
        println!("{} No stale claims", style("✓").green());
        return Ok(());
    }
    println!(
        "{} {} claims older than {}s",
        style("!").yellow(),
        stale.len(),
        threshold.as_secs()
    );
    for item in &stale {
        print_item(item);
    }
    Ok(())
}

/// Record a run's terminal status.
pub async fn run_status(config: &CrucibleConfig, run_id: &str, success: bool) -> anyhow::Result<()> {
    let run_id: RunId = run_id.parse().context("invalid run id")?;
    let stores = stores(config).await?;

    stores.runs.set_status(run_id, success).await?;
    let label = if success {
        style("success").green()
    } else {
        style("failure").red()
    };
    println!("{} Run {} finished: {}", style("✓").green(), run_id, label);
    Ok(())
}

pub async fn cancel_task(config: &CrucibleConfig, task_id: &str) -> anyhow::Result<()> {
    let task_id: TaskId = task_id.parse().context("invalid task id")?;
    let forced = stores(config).await?.tasks.cancel(task_id).await?;
    println!(
        "{} Canceled {} ({} runs stopped)",
        style("✓").green(),
        task_id,
        forced.len()
    );
    Ok(())
}

pub async fn cancel_run(config: &CrucibleConfig, run_id: &str) -> anyhow::Result<()> {
    let run_id: RunId = run_id.parse().context("invalid run id")?;
    let forced = stores(config).await?.runs.cancel(run_id).await?;
    println!(
        "{} Canceled the task of {} ({} runs stopped)",
        style("✓").green(),
        run_id,
        forced.len()
    );
    Ok(())
}

pub async fn cancel_submission(config: &CrucibleConfig, submission_id: &str) -> anyhow::Result<()> {
    let submission_id: SubmissionId = submission_id.parse().context("invalid submission id")?;
    let canceled = stores(config)
        .await?
        .submissions
        .cancel(submission_id)
        .await?;
    println!(
        "{} Canceled {} tasks of {}",
        style("✓").green(),
        canceled.len(),
        submission_id
    );
    Ok(())
}

pub async fn cancel_ref(
    config: &CrucibleConfig,
    repository: &str,
    ref_name: &str,
) -> anyhow::Result<()> {
    naming::owner_repo(repository)?;
    let ref_name = naming::qualify_branch(ref_name)?;
    let stores = stores(config).await?;

    let repo = stores
        .repositories
        .get_by_name(repository)
        .await?
        .with_context(|| format!("repository {repository} not found"))?;

    let canceled = stores.tasks.cancel_ref_by_name(repo.id, &ref_name).await?;
    if canceled.is_empty() && ref_name == repo.main_branch() {
        println!(
            "{} {} is the main branch; nothing canceled",
            style("!").yellow(),
            ref_name
        );
        return Ok(());
    }
    println!(
        "{} Canceled {} tasks on {}",
        style("✓").green(),
        canceled.len(),
        ref_name
    );
    Ok(())
}

/// Validate a task descriptor against an optional repository configuration.
pub fn validate_descriptor(path: &Path, repo_config: Option<&Path>) -> anyhow::Result<()> {
    let config = match repo_config {
        Some(p) => {
            let buf = std::fs::read(p).with_context(|| format!("failed to read {}", p.display()))?;
            RepoConfig::parse(&buf)?
        }
        None => RepoConfig::default(),
    };

    let buf = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let settings = TaskSettings::parse(&buf, true, &config)?;

    println!("{} {} is valid", style("✓").green(), path.display());
    println!("  Runs: {}", settings.runs.len());
    for (name, run) in &settings.runs {
        println!(
            "    - {} (queue {}, timeout {}s)",
            name, run.queue, run.timeout
        );
    }
    if !settings.dependencies.is_empty() {
        println!("  Dependencies: {}", settings.dependencies.join(", "));
    }
    Ok(())
}

/// Print a JSON schema.
pub fn print_schema(repo_config: bool) -> anyhow::Result<()> {
    let schema = if repo_config {
        descriptor::repo_config_schema()
    } else {
        descriptor::task_settings_schema()
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
