//! PostgreSQL implementation of UserStore.

use crate::db_err;
use async_trait::async_trait;
use crucible_core::Result;
use crucible_core::ids::UserId;
use crucible_core::ports::UserStore;
use crucible_core::repository::User;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(r: &PgRow) -> User {
        User {
            id: UserId::new(r.get("id")),
            username: r.get("username"),
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn find_by_name(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn create(&self, username: &str) -> Result<User> {
        let row = sqlx::query("INSERT INTO users (username) VALUES ($1) RETURNING id, username")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(Self::row_to_user(&row))
    }
}
