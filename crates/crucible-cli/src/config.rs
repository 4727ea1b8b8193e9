//! Configuration loading.
//!
//! Defaults, then the YAML file, then `CRUCIBLE__`-prefixed environment
//! variables (`CRUCIBLE__DATABASE__URL`, `CRUCIBLE__LOGGING__JSON`, ...).

use crucible_db::DatabaseConfig;
use crucible_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrucibleConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CrucibleConfig {
    /// Load configuration. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CRUCIBLE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = CrucibleConfig::load(Path::new("/nonexistent/crucible.yml")).unwrap();
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.scheduler.stale_claim_secs, 3600);
        assert_eq!(config.logging.level, "info");
    }
}
