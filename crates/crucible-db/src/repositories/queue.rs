//! PostgreSQL implementation of QueueStore.

use crate::db_err;
use crate::rows::{QUEUE_ITEM_COLUMNS, RUN_COLUMNS, row_to_queue_item, row_to_run};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crucible_core::ids::QueueItemId;
use crucible_core::ports::QueueStore;
use crucible_core::run::{NewQueueItem, QueueItem, queue_or_default};
use crucible_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue_many(&self, items: Vec<NewQueueItem>) -> Result<Vec<QueueItem>> {
        for item in &items {
            item.run.validate()?;
        }

        let run_sql = format!(
            r#"INSERT INTO runs AS r (task_id, name, settings)
               VALUES ($1, $2, $3)
               RETURNING {RUN_COLUMNS}"#
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut queued = Vec::with_capacity(items.len());

        for item in items {
            let settings = serde_json::to_value(&item.run.settings)?;
            let row = sqlx::query(&run_sql)
                .bind(item.run.task_id.get())
                .bind(&item.run.name)
                .bind(&settings)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
            let run = row_to_run(&row)?;

            let queue_name = queue_or_default(&item.queue_name).to_string();
            let row = sqlx::query(
                "INSERT INTO queue_items (run_id, queue_name) VALUES ($1, $2) RETURNING id",
            )
            .bind(run.id.get())
            .bind(&queue_name)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            queued.push(QueueItem {
                id: QueueItemId::new(row.get("id")),
                run,
                queue_name,
                running: false,
                running_on: None,
                started_at: None,
            });
        }

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(count = queued.len(), "Enqueued runs");
        Ok(queued)
    }

    async fn dequeue_next(&self, queue_name: &str, worker: &str) -> Result<Option<QueueItem>> {
        if worker.is_empty() {
            return Err(Error::Validation("worker identity is required".into()));
        }
        let queue_name = queue_or_default(queue_name);

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("LOCK TABLE queue_items IN ACCESS EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let row = sqlx::query(
            r#"SELECT qi.id, qi.run_id, r.task_id FROM queue_items qi
               JOIN runs r ON r.id = qi.run_id
               WHERE qi.queue_name = $1 AND NOT qi.running
               ORDER BY qi.id
               LIMIT 1"#,
        )
        .bind(queue_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        };

        let item_id: i64 = row.get("id");
        let run_id: i64 = row.get("run_id");
        let task_id: i64 = row.get("task_id");

        sqlx::query("UPDATE runs SET started_at = NOW(), ran_on = $2 WHERE id = $1")
            .bind(run_id)
            .bind(worker)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("UPDATE tasks SET started_at = NOW() WHERE id = $1 AND started_at IS NULL")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "UPDATE queue_items SET running = TRUE, running_on = $2, started_at = NOW() WHERE id = $1",
        )
        .bind(item_id)
        .bind(worker)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let sql = format!(
            r#"SELECT {QUEUE_ITEM_COLUMNS}, {RUN_COLUMNS}
               FROM queue_items qi JOIN runs r ON r.id = qi.run_id
               WHERE qi.id = $1"#
        );
        let row = sqlx::query(&sql)
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let item = row_to_queue_item(&row)?;

        tx.commit().await.map_err(db_err)?;

        tracing::info!(queue = queue_name, worker, run_id = %item.run.id, "Queue item claimed");
        Ok(Some(item))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<QueueItem>> {
        let sql = format!(
            r#"SELECT {QUEUE_ITEM_COLUMNS}, {RUN_COLUMNS}
               FROM queue_items qi JOIN runs r ON r.id = qi.run_id
               ORDER BY qi.id
               LIMIT $1 OFFSET $2"#
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_queue_item).collect()
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM queue_items")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get("count"))
    }

    async fn list_for_repository(
        &self,
        repository: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueItem>> {
        let sql = format!(
            r#"SELECT {QUEUE_ITEM_COLUMNS}, {RUN_COLUMNS}
               FROM queue_items qi
               JOIN runs r ON r.id = qi.run_id
               JOIN tasks t ON t.id = r.task_id
               JOIN submissions s ON s.id = t.submission_id
               JOIN refs base ON base.id = s.base_ref_id
               JOIN repositories repo ON repo.id = base.repository_id
               WHERE repo.name = $1
               ORDER BY qi.id
               LIMIT $2 OFFSET $3"#
        );
        let rows = sqlx::query(&sql)
            .bind(repository)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_queue_item).collect()
    }

    async fn stale_claims(&self, older_than: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let sql = format!(
            r#"SELECT {QUEUE_ITEM_COLUMNS}, {RUN_COLUMNS}
               FROM queue_items qi JOIN runs r ON r.id = qi.run_id
               WHERE qi.running AND qi.started_at < $1 AND r.finished_at IS NULL
               ORDER BY qi.started_at"#
        );
        let rows = sqlx::query(&sql)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_queue_item).collect()
    }
}
