//! Test context providing access to the store backends.

use crate::containers::PostgresContainer;
use crucible_core::ports::Stores;
use crucible_db::{Database, DatabaseConfig, MemoryStore};

/// A migrated PostgreSQL database in a container.
///
/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl TestContext {
    /// Start PostgreSQL and apply migrations.
    pub async fn postgres() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let config = DatabaseConfig::new(postgres.connection_string()).with_max_connections(10);
        let db = Database::connect(&config).await?;
        db.migrate().await?;

        Ok(Self { postgres, db })
    }

    /// In-process stores for tests that need no database.
    pub fn memory() -> Stores {
        crate::init_test_logging();
        MemoryStore::new().stores()
    }

    pub fn stores(&self) -> Stores {
        self.db.stores()
    }

    /// Get database connection string.
    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }
}
