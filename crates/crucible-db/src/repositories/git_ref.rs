//! PostgreSQL implementation of RefStore.

use crate::db_err;
use crate::rows::{REF_COLUMNS, row_to_ref};
use async_trait::async_trait;
use crucible_core::Result;
use crucible_core::ids::RefId;
use crucible_core::ports::RefStore;
use crucible_core::submission::{NewRef, Ref};
use sqlx::PgPool;

pub struct PgRefStore {
    pool: PgPool,
}

impl PgRefStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefStore for PgRefStore {
    async fn find(&self, repository: &str, sha: &str) -> Result<Option<Ref>> {
        let sql = format!(
            r#"SELECT {REF_COLUMNS} FROM refs rf
               JOIN repositories repo ON repo.id = rf.repository_id
               WHERE repo.name = $1 AND rf.sha = $2"#
        );
        let row = sqlx::query(&sql)
            .bind(repository)
            .bind(sha)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_ref))
    }

    async fn get(&self, id: RefId) -> Result<Option<Ref>> {
        let sql = format!("SELECT {REF_COLUMNS} FROM refs rf WHERE rf.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_ref))
    }

    async fn create(&self, new: &NewRef) -> Result<Ref> {
        new.validate()?;

        let sql = format!(
            "INSERT INTO refs AS rf (repository_id, ref_name, sha) VALUES ($1, $2, $3) RETURNING {REF_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.repository_id.get())
            .bind(&new.ref_name)
            .bind(&new.sha)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row_to_ref(&row))
    }
}
