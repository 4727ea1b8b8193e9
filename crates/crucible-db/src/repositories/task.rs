//! PostgreSQL implementation of TaskStore.

use crate::db_err;
use crate::rows::{REPOSITORY_COLUMNS, RUN_COLUMNS, TASK_COLUMNS, row_to_repository, row_to_run, row_to_task};
use crate::tx::cancel_task_tx;
use async_trait::async_trait;
use crucible_core::ids::{RepositoryId, RunId, TaskId};
use crucible_core::ports::TaskStore;
use crucible_core::run::Run;
use crucible_core::task::{NewTask, Task};
use crucible_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Cancel each task independently. Already-finished tasks are skipped;
    /// any other failure stops the sweep.
    async fn cancel_all(&self, ids: Vec<TaskId>) -> Result<Vec<TaskId>> {
        let mut canceled = Vec::with_capacity(ids.len());
        for task_id in ids {
            match cancel_task_tx(&self.pool, task_id).await {
                Ok(_) => canceled.push(task_id),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(task_id = %task_id, "Task finished before it could be canceled");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(canceled)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, new: &NewTask) -> Result<Task> {
        new.validate()?;

        let settings = serde_json::to_value(&new.settings)?;
        let sql = format!(
            r#"INSERT INTO tasks AS t (submission_id, path, settings)
               VALUES ($1, $2, $3)
               RETURNING {TASK_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(new.submission_id.get())
            .bind(&new.path)
            .bind(&settings)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row_to_task(&row)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn runs(&self, id: TaskId) -> Result<Vec<Run>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs r WHERE r.task_id = $1 ORDER BY r.id");
        let rows = sqlx::query(&sql)
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_run).collect()
    }

    async fn cancel(&self, id: TaskId) -> Result<Vec<RunId>> {
        cancel_task_tx(&self.pool, id).await
    }

    async fn cancel_ref_by_name(
        &self,
        repository_id: RepositoryId,
        ref_name: &str,
    ) -> Result<Vec<TaskId>> {
        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories repo WHERE repo.id = $1");
        let repository = sqlx::query(&sql)
            .bind(repository_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|r| row_to_repository(&r))
            .ok_or_else(|| Error::not_found(repository_id))?;

        if repository.main_branch() == ref_name {
            tracing::debug!(repository = %repository.name, ref_name, "Not canceling the main branch");
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"SELECT t.id FROM tasks t
               JOIN submissions s ON s.id = t.submission_id
               JOIN refs rf ON rf.id = s.head_ref_id
               WHERE rf.repository_id = $1 AND rf.ref_name = $2 AND t.finished_at IS NULL
               ORDER BY t.id"#,
        )
        .bind(repository_id.get())
        .bind(ref_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids = rows.iter().map(|r| TaskId::new(r.get("id"))).collect();
        self.cancel_all(ids).await
    }

    async fn cancel_for_ticket(&self, repository: &str, ticket_id: i64) -> Result<Vec<TaskId>> {
        let rows = sqlx::query(
            r#"SELECT t.id FROM tasks t
               JOIN submissions s ON s.id = t.submission_id
               JOIN refs rf ON rf.id = s.base_ref_id
               JOIN repositories repo ON repo.id = rf.repository_id
               WHERE repo.name = $1 AND s.ticket_id = $2 AND t.finished_at IS NULL
               ORDER BY t.id"#,
        )
        .bind(repository)
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids = rows.iter().map(|r| TaskId::new(r.get("id"))).collect();
        self.cancel_all(ids).await
    }
}
