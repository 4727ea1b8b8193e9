//! Statements shared by the run, task and submission stores.
//!
//! Lock order is the `queue_items` table, then runs (by id), then their
//! task, everywhere. Dequeue takes the table lock first, so every writer that
//! drops queue items must too.

use crate::db_err;
use crate::rows::{RUN_COLUMNS, row_to_run};
use crucible_core::ids::{RunId, TaskId};
use crucible_core::task::rollup;
use crucible_core::{Error, Result};
use sqlx::{PgConnection, PgPool, Row};

/// Take the `queue_items` table lock ahead of any row lock. Row exclusive
/// mode waits for an in-flight dequeue without serializing writers among
/// themselves.
pub(crate) async fn lock_queue(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("LOCK TABLE queue_items IN ROW EXCLUSIVE MODE")
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Record a terminal status on a run and drop its queue item. Returns the
/// owning task. The caller holds [`lock_queue`].
pub(crate) async fn finish_run(
    conn: &mut PgConnection,
    run_id: RunId,
    status: bool,
) -> Result<TaskId> {
    let row = sqlx::query("SELECT task_id, status FROM runs WHERE id = $1 FOR UPDATE")
        .bind(run_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::not_found(run_id))?;

    if row.get::<Option<bool>, _>("status").is_some() {
        return Err(Error::Conflict(format!("{run_id} already has a status")));
    }

    sqlx::query("DELETE FROM queue_items WHERE run_id = $1")
        .bind(run_id.get())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    sqlx::query("UPDATE runs SET status = $2, finished_at = NOW() WHERE id = $1")
        .bind(run_id.get())
        .bind(status)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    Ok(TaskId::new(row.get("task_id")))
}

/// Recompute a task's aggregate status from its runs. Finished tasks are left
/// untouched. Returns the status written, if any.
pub(crate) async fn rollup_task(conn: &mut PgConnection, task_id: TaskId) -> Result<Option<bool>> {
    let row = sqlx::query("SELECT finished_at FROM tasks WHERE id = $1 FOR UPDATE")
        .bind(task_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::not_found(task_id))?;

    if row
        .get::<Option<chrono::DateTime<chrono::Utc>>, _>("finished_at")
        .is_some()
    {
        return Ok(None);
    }

    let sql = format!("SELECT {RUN_COLUMNS} FROM runs r WHERE r.task_id = $1 ORDER BY r.id");
    let rows = sqlx::query(&sql)
        .bind(task_id.get())
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
    let runs = rows.iter().map(row_to_run).collect::<Result<Vec<_>>>()?;

    let Some(status) = rollup(&runs) else {
        return Ok(None);
    };

    sqlx::query("UPDATE tasks SET status = $2, finished_at = NOW() WHERE id = $1")
        .bind(task_id.get())
        .bind(status)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    tracing::debug!(task_id = %task_id, status, "Task finished");
    Ok(Some(status))
}

/// Force the task's outstanding runs to failed and mark it canceled.
pub(crate) async fn cancel_task(conn: &mut PgConnection, task_id: TaskId) -> Result<Vec<RunId>> {
    lock_queue(&mut *conn).await?;

    let runs = sqlx::query("SELECT id, status FROM runs WHERE task_id = $1 ORDER BY id FOR UPDATE")
        .bind(task_id.get())
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

    let task = sqlx::query("SELECT finished_at FROM tasks WHERE id = $1 FOR UPDATE")
        .bind(task_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::not_found(task_id))?;

    if task
        .get::<Option<chrono::DateTime<chrono::Utc>>, _>("finished_at")
        .is_some()
    {
        return Err(Error::Conflict(format!(
            "{task_id} is already finished"
        )));
    }

    let mut forced = Vec::new();
    for row in &runs {
        if row.get::<Option<bool>, _>("status").is_some() {
            continue;
        }
        let run_id = RunId::new(row.get("id"));
        finish_run(&mut *conn, run_id, false).await?;
        forced.push(run_id);
    }

    sqlx::query(
        "UPDATE tasks SET canceled = TRUE, status = FALSE, finished_at = NOW() WHERE id = $1",
    )
    .bind(task_id.get())
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(forced)
}

/// Cancel one task in its own transaction.
pub(crate) async fn cancel_task_tx(pool: &PgPool, task_id: TaskId) -> Result<Vec<RunId>> {
    let mut tx = pool.begin().await.map_err(db_err)?;
    let forced = cancel_task(&mut tx, task_id).await?;
    tx.commit().await.map_err(db_err)?;

    tracing::info!(task_id = %task_id, runs = forced.len(), "Task canceled");
    Ok(forced)
}
