//! Store scenarios shared by the in-process and PostgreSQL test binaries.
//!
//! Each scenario seeds its own repository so several can share one database.

use crate::fixtures::{FEATURE_BRANCH, MAIN_BRANCH, as_strs, run_names, seed_submission, seed_task};
use anyhow::{bail, ensure};
use crucible_core::ids::{QueueItemId, RunId};
use crucible_core::ports::Stores;
use std::collections::HashSet;

/// Items come out in insertion order, then the queue reports empty.
pub async fn queue_fifo(stores: &Stores, repository: &str) -> anyhow::Result<()> {
    let queue = format!("{repository}-fifo");
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let names = run_names("run", 3);
    let (_, queued) = seed_task(stores, seeded.submission_id, ".", &as_strs(&names), &queue).await?;

    for expected in &queued {
        let Some(item) = stores.queue.dequeue_next(&queue, "worker-a").await? else {
            bail!("queue emptied early");
        };
        ensure!(item.id == expected.id, "expected {}, got {}", expected.id, item.id);
        ensure!(item.running);
        ensure!(item.running_on.as_deref() == Some("worker-a"));
        ensure!(item.run.started_at.is_some());
        ensure!(item.run.ran_on.as_deref() == Some("worker-a"));
    }

    ensure!(stores.queue.dequeue_next(&queue, "worker-a").await?.is_none());
    Ok(())
}

/// A claim requires a worker identity.
pub async fn queue_requires_worker(stores: &Stores) -> anyhow::Result<()> {
    match stores.queue.dequeue_next("default", "").await {
        Err(e) if e.is_validation() => Ok(()),
        other => bail!("expected a validation error, got {other:?}"),
    }
}

/// `workers` concurrent consumers drain `items` with no item claimed twice.
pub async fn queue_concurrent_dequeue(
    stores: &Stores,
    repository: &str,
    workers: usize,
    items: usize,
) -> anyhow::Result<()> {
    let queue = format!("{repository}-concurrent");
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let names = run_names("run", items);
    seed_task(stores, seeded.submission_id, ".", &as_strs(&names), &queue).await?;

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let store = stores.queue.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let worker = format!("worker-{w}");
                let mut claimed = Vec::new();
                while let Some(item) = store.dequeue_next(&queue, &worker).await? {
                    claimed.push(item.id);
                }
                Ok::<_, crucible_core::Error>(claimed)
            })
        })
        .collect();

    let mut seen: HashSet<QueueItemId> = HashSet::new();
    for result in futures::future::join_all(handles).await {
        for id in result?? {
            ensure!(seen.insert(id), "{id} was claimed twice");
        }
    }
    ensure!(seen.len() == items, "claimed {} of {items} items", seen.len());
    Ok(())
}

/// Two workers race for a single item; exactly one wins.
pub async fn queue_single_item_race(stores: &Stores, repository: &str) -> anyhow::Result<()> {
    let queue = format!("{repository}-race");
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let (_, queued) = seed_task(stores, seeded.submission_id, ".", &["only"], &queue).await?;

    let (a, b) = tokio::join!(
        stores.queue.dequeue_next(&queue, "worker-a"),
        stores.queue.dequeue_next(&queue, "worker-b"),
    );
    let winners: Vec<_> = [a?, b?].into_iter().flatten().collect();

    ensure!(winners.len() == 1, "{} workers claimed the item", winners.len());
    ensure!(winners[0].id == queued[0].id);
    Ok(())
}

/// Terminal statuses are set once; the task rolls up when its last run
/// finishes and never again.
pub async fn run_status_rollup(stores: &Stores, repository: &str) -> anyhow::Result<()> {
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let (task, queued) =
        seed_task(stores, seeded.submission_id, ".", &["build", "test"], "default").await?;
    let (first, second) = (queued[0].run.id, queued[1].run.id);

    stores.runs.set_status(first, true).await?;
    match stores.runs.set_status(first, false).await {
        Err(e) if e.is_conflict() => {}
        other => bail!("expected a conflict, got {other:?}"),
    }

    let pending = stores.tasks.get(task.id).await?;
    ensure!(pending.is_some_and(|t| t.finished_at.is_none()));

    stores.runs.set_status(second, false).await?;
    let Some(finished) = stores.tasks.get(task.id).await? else {
        bail!("task vanished");
    };
    ensure!(finished.status == Some(false), "status {:?}", finished.status);
    ensure!(finished.finished_at.is_some());
    ensure!(!finished.canceled);

    let Some(run) = stores.runs.get(first).await? else {
        bail!("run vanished");
    };
    ensure!(run.status == Some(true));

    // Completed runs leave the queue.
    ensure!(
        stores
            .queue
            .list_for_repository(repository, 10, 0)
            .await?
            .is_empty()
    );
    Ok(())
}

/// Canceling a task forces its outstanding runs to failed and drops their
/// queue items; a second cancel conflicts.
pub async fn cancel_task_forces_runs(stores: &Stores, repository: &str) -> anyhow::Result<()> {
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let (task, queued) =
        seed_task(stores, seeded.submission_id, ".", &["a", "b", "c"], "default").await?;
    stores.runs.set_status(queued[0].run.id, true).await?;

    let mut forced = stores.tasks.cancel(task.id).await?;
    forced.sort();
    let mut expected: Vec<RunId> = queued[1..].iter().map(|i| i.run.id).collect();
    expected.sort();
    ensure!(forced == expected, "forced {forced:?}");

    let Some(canceled) = stores.tasks.get(task.id).await? else {
        bail!("task vanished");
    };
    ensure!(canceled.canceled);
    ensure!(canceled.status == Some(false));

    for run in stores.tasks.runs(task.id).await? {
        ensure!(run.is_terminal(), "{} still outstanding", run.id);
    }
    ensure!(
        stores
            .queue
            .list_for_repository(repository, 10, 0)
            .await?
            .is_empty()
    );

    match stores.tasks.cancel(task.id).await {
        Err(e) if e.is_conflict() => Ok(()),
        other => bail!("expected a conflict, got {other:?}"),
    }
}

/// A task is canceled while `workers` consumers drain its queue. Both sides
/// succeed, every run ends failed, no item is claimed twice and nothing is
/// left queued.
pub async fn cancel_while_dequeuing(
    stores: &Stores,
    repository: &str,
    workers: usize,
    items: usize,
    rounds: usize,
) -> anyhow::Result<()> {
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let names = run_names("run", items);

    for round in 0..rounds {
        let queue = format!("{repository}-cancel-{round}");
        let (task, _) = seed_task(
            stores,
            seeded.submission_id,
            &format!("t{round}"),
            &as_strs(&names),
            &queue,
        )
        .await?;

        let consumers: Vec<_> = (0..workers)
            .map(|w| {
                let store = stores.queue.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    let worker = format!("worker-{w}");
                    let mut claimed = Vec::new();
                    while let Some(item) = store.dequeue_next(&queue, &worker).await? {
                        claimed.push(item.id);
                    }
                    Ok::<_, crucible_core::Error>(claimed)
                })
            })
            .collect();

        let tasks = stores.tasks.clone();
        let cancel = tokio::spawn(async move { tasks.cancel(task.id).await });

        let mut seen: HashSet<QueueItemId> = HashSet::new();
        for result in futures::future::join_all(consumers).await {
            for id in result?? {
                ensure!(seen.insert(id), "round {round}: {id} was claimed twice");
            }
        }
        let forced = cancel.await??;
        ensure!(
            forced.len() == items,
            "round {round}: forced {} of {items} runs",
            forced.len()
        );

        let Some(canceled) = stores.tasks.get(task.id).await? else {
            bail!("round {round}: task vanished");
        };
        ensure!(canceled.canceled && canceled.status == Some(false));
        for run in stores.tasks.runs(task.id).await? {
            ensure!(run.status == Some(false), "round {round}: {} not failed", run.id);
        }
        ensure!(stores.queue.dequeue_next(&queue, "worker-late").await?.is_none());
    }
    Ok(())
}

/// Canceling by the main branch does nothing; a feature branch cancels its
/// unfinished tasks.
pub async fn cancel_ref_skips_main_branch(stores: &Stores, repository: &str) -> anyhow::Result<()> {
    let main = seed_submission(stores, repository, MAIN_BRANCH).await?;
    let (main_task, _) = seed_task(stores, main.submission_id, ".", &["a"], "default").await?;

    let canceled = stores
        .tasks
        .cancel_ref_by_name(main.repository.id, MAIN_BRANCH)
        .await?;
    ensure!(canceled.is_empty(), "canceled {canceled:?}");
    ensure!(
        stores
            .tasks
            .get(main_task.id)
            .await?
            .is_some_and(|t| !t.canceled)
    );
    Ok(())
}

/// A submission cancel skips finished tasks and cancels the rest.
pub async fn cancel_submission_skips_finished(
    stores: &Stores,
    repository: &str,
) -> anyhow::Result<()> {
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    let (done, done_items) = seed_task(stores, seeded.submission_id, "done", &["a"], "default").await?;
    let (open, _) = seed_task(stores, seeded.submission_id, "open", &["a", "b"], "default").await?;
    stores.runs.set_status(done_items[0].run.id, true).await?;

    let canceled = stores.submissions.cancel(seeded.submission_id).await?;
    ensure!(canceled == vec![open.id], "canceled {canceled:?}");

    let Some(done) = stores.tasks.get(done.id).await? else {
        bail!("task vanished");
    };
    ensure!(done.status == Some(true) && !done.canceled);

    let runs = stores.submissions.runs(seeded.submission_id).await?;
    ensure!(runs.len() == 3);
    ensure!(runs.iter().all(|r| r.is_terminal()));
    Ok(())
}

/// Stale claims are claimed, unfinished and older than the cutoff.
pub async fn stale_claims(stores: &Stores, repository: &str) -> anyhow::Result<()> {
    let queue = format!("{repository}-stale");
    let seeded = seed_submission(stores, repository, FEATURE_BRANCH).await?;
    seed_task(stores, seeded.submission_id, ".", &["a", "b"], &queue).await?;

    let Some(claimed) = stores.queue.dequeue_next(&queue, "worker-a").await? else {
        bail!("queue empty");
    };

    let future = chrono::Utc::now() + chrono::Duration::seconds(60);
    let stale = stores.queue.stale_claims(future).await?;
    let ids: Vec<_> = stale
        .iter()
        .filter(|i| i.queue_name == queue)
        .map(|i| i.id)
        .collect();
    ensure!(ids == vec![claimed.id], "stale {ids:?}");

    let past = chrono::Utc::now() - chrono::Duration::seconds(3600);
    ensure!(
        stores
            .queue
            .stale_claims(past)
            .await?
            .iter()
            .all(|i| i.queue_name != queue)
    );
    Ok(())
}
