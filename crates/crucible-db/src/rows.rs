//! Row mapping shared by the PostgreSQL stores.

use crucible_core::descriptor::{RunSettings, TaskSettings};
use crucible_core::ids::*;
use crucible_core::repository::Repository;
use crucible_core::run::{QueueItem, Run};
use crucible_core::submission::{Ref, Submission};
use crucible_core::task::Task;
use crucible_core::{Error, Result};
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) const REPOSITORY_COLUMNS: &str =
    "repo.id, repo.name, repo.owner_id, repo.private, repo.disabled, repo.auto_created, repo.upstream, repo.created_at";

pub(crate) const REF_COLUMNS: &str = "rf.id, rf.repository_id, rf.ref_name, rf.sha";

pub(crate) const SUBMISSION_COLUMNS: &str =
    "s.id, s.base_ref_id, s.head_ref_id, s.user_id, s.ticket_id, s.created_at";

pub(crate) const TASK_COLUMNS: &str = "t.id, t.submission_id, t.path, t.settings, t.canceled, t.created_at, t.started_at, t.finished_at, t.status";

pub(crate) const RUN_COLUMNS: &str =
    "r.id, r.task_id, r.name, r.settings, r.created_at, r.started_at, r.finished_at, r.status, r.ran_on";

pub(crate) const QUEUE_ITEM_COLUMNS: &str = "qi.id AS queue_item_id, qi.queue_name, qi.running, qi.running_on, qi.started_at AS claimed_at";

fn settings<T: serde::de::DeserializeOwned>(r: &PgRow) -> Result<T> {
    serde_json::from_value(r.get("settings")).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn row_to_repository(r: &PgRow) -> Repository {
    Repository {
        id: RepositoryId::new(r.get("id")),
        name: r.get("name"),
        owner_id: UserId::new(r.get("owner_id")),
        private: r.get("private"),
        disabled: r.get("disabled"),
        auto_created: r.get("auto_created"),
        upstream: r.get("upstream"),
        created_at: r.get("created_at"),
    }
}

pub(crate) fn row_to_ref(r: &PgRow) -> Ref {
    Ref {
        id: RefId::new(r.get("id")),
        repository_id: RepositoryId::new(r.get("repository_id")),
        ref_name: r.get("ref_name"),
        sha: r.get("sha"),
    }
}

pub(crate) fn row_to_submission(r: &PgRow) -> Submission {
    Submission {
        id: SubmissionId::new(r.get("id")),
        base_ref_id: RefId::new(r.get("base_ref_id")),
        head_ref_id: r.get::<Option<i64>, _>("head_ref_id").map(RefId::new),
        user_id: r.get::<Option<i64>, _>("user_id").map(UserId::new),
        ticket_id: r.get("ticket_id"),
        created_at: r.get("created_at"),
    }
}

pub(crate) fn row_to_task(r: &PgRow) -> Result<Task> {
    let mut settings: TaskSettings = settings(r)?;
    for (name, run) in settings.runs.iter_mut() {
        run.name = name.clone();
    }

    Ok(Task {
        id: TaskId::new(r.get("id")),
        submission_id: SubmissionId::new(r.get("submission_id")),
        path: r.get("path"),
        settings,
        canceled: r.get("canceled"),
        created_at: r.get("created_at"),
        started_at: r.get("started_at"),
        finished_at: r.get("finished_at"),
        status: r.get("status"),
    })
}

pub(crate) fn row_to_run(r: &PgRow) -> Result<Run> {
    let name: String = r.get("name");
    let mut settings: RunSettings = settings(r)?;
    settings.name = name.clone();

    Ok(Run {
        id: RunId::new(r.get("id")),
        task_id: TaskId::new(r.get("task_id")),
        name,
        settings,
        created_at: r.get("created_at"),
        started_at: r.get("started_at"),
        finished_at: r.get("finished_at"),
        status: r.get("status"),
        ran_on: r.get("ran_on"),
    })
}

/// Expects [`QUEUE_ITEM_COLUMNS`] alongside [`RUN_COLUMNS`].
pub(crate) fn row_to_queue_item(r: &PgRow) -> Result<QueueItem> {
    Ok(QueueItem {
        id: QueueItemId::new(r.get("queue_item_id")),
        run: row_to_run(r)?,
        queue_name: r.get("queue_name"),
        running: r.get("running"),
        running_on: r.get("running_on"),
        started_at: r.get("claimed_at"),
    })
}
