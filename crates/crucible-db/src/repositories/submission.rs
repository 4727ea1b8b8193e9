//! PostgreSQL implementation of SubmissionStore.

use crate::db_err;
use crate::rows::{RUN_COLUMNS, SUBMISSION_COLUMNS, TASK_COLUMNS, row_to_run, row_to_submission, row_to_task};
use crate::tx::cancel_task_tx;
use async_trait::async_trait;
use crucible_core::ids::{SubmissionId, TaskId};
use crucible_core::ports::SubmissionStore;
use crucible_core::run::Run;
use crucible_core::submission::{NewSubmission, Submission};
use crucible_core::task::Task;
use crucible_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn create(&self, new: &NewSubmission) -> Result<Submission> {
        let sql = format!(
            r#"INSERT INTO submissions AS s (base_ref_id, head_ref_id, user_id, ticket_id)
               VALUES ($1, $2, $3, $4)
               RETURNING {SUBMISSION_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(new.base_ref_id.get())
            .bind(new.head_ref_id.map(|id| id.get()))
            .bind(new.user_id.map(|id| id.get()))
            .bind(new.ticket_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row_to_submission(&row))
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions s WHERE s.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_submission))
    }

    async fn tasks(&self, id: SubmissionId) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.submission_id = $1 ORDER BY t.id");
        let rows = sqlx::query(&sql)
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn runs(&self, id: SubmissionId) -> Result<Vec<Run>> {
        let sql = format!(
            r#"SELECT {RUN_COLUMNS} FROM runs r
               JOIN tasks t ON t.id = r.task_id
               WHERE t.submission_id = $1
               ORDER BY r.id"#
        );
        let rows = sqlx::query(&sql)
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_run).collect()
    }

    async fn cancel(&self, id: SubmissionId) -> Result<Vec<TaskId>> {
        let exists = sqlx::query("SELECT id FROM submissions WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(Error::not_found(id));
        }

        let rows = sqlx::query(
            "SELECT id FROM tasks WHERE submission_id = $1 AND finished_at IS NULL ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut canceled = Vec::new();
        for row in rows {
            let task_id = TaskId::new(row.get("id"));
            match cancel_task_tx(&self.pool, task_id).await {
                Ok(_) => canceled.push(task_id),
                Err(e) => {
                    tracing::warn!(submission_id = %id, task_id = %task_id, error = %e, "Failed to cancel task");
                }
            }
        }

        Ok(canceled)
    }
}
