//! Testcontainer configurations for integration tests.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

const DB_NAME: &str = "crucible";
const DB_USER: &str = "crucible";
const DB_PASSWORD: &str = "crucible";

/// PostgreSQL container holding an empty `crucible` database.
pub struct PostgresContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default()
            .with_db_name(DB_NAME)
            .with_user(DB_USER)
            .with_password(DB_PASSWORD)
            .with_tag("16-alpine")
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        let connection_string =
            format!("postgres://{DB_USER}:{DB_PASSWORD}@{host}:{port}/{DB_NAME}");
        tracing::debug!(%host, port, "PostgreSQL container started");

        Ok(Self {
            container,
            connection_string,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
