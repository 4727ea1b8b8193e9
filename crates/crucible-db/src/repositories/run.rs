//! PostgreSQL implementation of RunStore.

use crate::db_err;
use crate::rows::{RUN_COLUMNS, row_to_run};
use crate::tx::{cancel_task_tx, finish_run, lock_queue, rollup_task};
use async_trait::async_trait;
use crucible_core::ids::{RunId, TaskId};
use crucible_core::ports::RunStore;
use crucible_core::run::{Run, RunDetail};
use crucible_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn get(&self, id: RunId) -> Result<Option<Run>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs r WHERE r.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn detail(&self, id: RunId) -> Result<Option<RunDetail>> {
        let sql = format!(
            r#"SELECT {RUN_COLUMNS}, repo.name AS repository_name, COALESCE(head.sha, base.sha) AS head_sha
               FROM runs r
               JOIN tasks t ON t.id = r.task_id
               JOIN submissions s ON s.id = t.submission_id
               JOIN refs base ON base.id = s.base_ref_id
               JOIN repositories repo ON repo.id = base.repository_id
               LEFT JOIN refs head ON head.id = s.head_ref_id
               WHERE r.id = $1"#
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RunDetail {
            run: row_to_run(&row)?,
            repository: row.get("repository_name"),
            head_sha: row.get("head_sha"),
        }))
    }

    async fn set_status(&self, id: RunId, status: bool) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        lock_queue(&mut tx).await?;
        let task_id = finish_run(&mut tx, id, status).await?;
        rollup_task(&mut tx, task_id).await?;
        tx.commit().await.map_err(db_err)?;

        tracing::info!(run_id = %id, status, "Run finished");
        Ok(())
    }

    async fn cancel(&self, id: RunId) -> Result<Vec<RunId>> {
        let row = sqlx::query("SELECT task_id FROM runs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::not_found(id))?;

        cancel_task_tx(&self.pool, TaskId::new(row.get("task_id"))).await
    }
}
