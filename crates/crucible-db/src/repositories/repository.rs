//! PostgreSQL implementation of RepositoryStore.

use crate::db_err;
use crate::rows::{REPOSITORY_COLUMNS, row_to_repository};
use async_trait::async_trait;
use crucible_core::ids::RepositoryId;
use crucible_core::ports::RepositoryStore;
use crucible_core::repository::{NewRepository, Repository};
use crucible_core::{Error, Result};
use sqlx::PgPool;

pub struct PgRepositoryStore {
    pool: PgPool,
}

impl PgRepositoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryStore for PgRepositoryStore {
    async fn get(&self, id: RepositoryId) -> Result<Option<Repository>> {
        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories repo WHERE repo.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_repository))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Repository>> {
        let sql =
            format!("SELECT {REPOSITORY_COLUMNS} FROM repositories repo WHERE repo.name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_repository))
    }

    async fn create(&self, repository: &NewRepository) -> Result<Repository> {
        let sql = format!(
            r#"INSERT INTO repositories AS repo (name, owner_id, private, disabled, auto_created, upstream)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {REPOSITORY_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(&repository.name)
            .bind(repository.owner_id.get())
            .bind(repository.private)
            .bind(repository.disabled)
            .bind(repository.auto_created)
            .bind(&repository.upstream)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        tracing::info!(repository = %repository.name, "Repository registered");
        Ok(row_to_repository(&row))
    }

    async fn set_disabled(&self, id: RepositoryId, disabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE repositories SET disabled = $2 WHERE id = $1")
            .bind(id.get())
            .bind(disabled)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(id));
        }
        Ok(())
    }
}
