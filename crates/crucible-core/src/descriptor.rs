//! Task descriptor and repository configuration types.
//!
//! These types represent the user-authored `task.yml` files found in task
//! directories and the repository-wide `crucible.yml` that supplies defaults
//! and overrides for them.

use crate::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// File name of a task descriptor inside a task directory.
pub const TASK_FILENAME: &str = "task.yml";

/// File name of the repository configuration at the repository root.
pub const REPO_CONFIG_FILENAME: &str = "crucible.yml";

/// Queue used when nothing else names one.
pub const DEFAULT_QUEUE: &str = "default";

pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Invalid(String),
}

impl From<DescriptorError> for Error {
    fn from(err: DescriptorError) -> Self {
        Error::Validation(err.to_string())
    }
}

/// Resources requested for a run. Units are interpreted by the runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub memory: u32,
    #[serde(default)]
    pub disk: u32,
    #[serde(default)]
    pub iops: u32,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        *self == Resources::default()
    }
}

/// Settings for one named run inside a task descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Timeout in seconds; zero means none.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub resources: Resources,
    /// Filled from the key of the `runs` map; never stored or read.
    #[serde(skip)]
    #[schemars(skip)]
    pub name: String,
}

impl RunSettings {
    /// Standalone validation applied before a run is stored.
    pub fn validate(&self) -> std::result::Result<(), DescriptorError> {
        if self.command.is_empty() {
            return Err(DescriptorError::Invalid("command was empty".into()));
        }
        if self.image.is_empty() {
            return Err(DescriptorError::Invalid("image was empty".into()));
        }
        if self.queue.is_empty() {
            return Err(DescriptorError::Invalid("queue name was empty".into()));
        }
        Ok(())
    }
}

/// A parsed `task.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TaskSettings {
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub runs: BTreeMap<String, RunSettings>,
    /// Default run timeout in seconds.
    #[serde(default)]
    pub default_timeout: u64,
    #[serde(default)]
    pub default_queue: String,
    #[serde(default)]
    pub default_image: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub default_resources: Resources,
}

impl TaskSettings {
    /// Parse a descriptor, apply the repository configuration and validate.
    ///
    /// With `require_runs` unset, a descriptor that only lists dependencies is
    /// accepted; it is later dropped by [`TaskSettings::validate`] with runs
    /// required.
    pub fn parse(
        buf: &[u8],
        require_runs: bool,
        config: &RepoConfig,
    ) -> std::result::Result<Self, DescriptorError> {
        let mut settings: TaskSettings =
            serde_yaml::from_slice(buf).map_err(|e| DescriptorError::Parse(e.to_string()))?;

        settings.apply_config(config);
        settings.validate(require_runs)?;
        Ok(settings)
    }

    pub fn validate(&mut self, require_runs: bool) -> std::result::Result<(), DescriptorError> {
        if self.runs.is_empty() {
            if require_runs {
                return Err(DescriptorError::Invalid(
                    "runs are required to proceed further with this task".into(),
                ));
            }
            if self.dependencies.is_empty() {
                return Err(DescriptorError::Invalid(
                    "no runs in task and no dependencies".into(),
                ));
            }
            return Ok(());
        }

        if self.mountpoint.is_empty() {
            return Err(DescriptorError::Invalid("no mountpoint".into()));
        }

        if self.workdir.is_empty() {
            self.workdir = self.mountpoint.clone();
        }

        let defaults = self.default_resources;
        for run in self.runs.values_mut() {
            run.validate()?;
            if run.resources.is_empty() {
                run.resources = defaults;
            }
        }

        Ok(())
    }

    /// Fold repository defaults and overrides into this descriptor.
    pub fn apply_config(&mut self, config: &RepoConfig) {
        if self.default_image.is_empty() && !config.default_image.is_empty() {
            self.default_image = config.default_image.clone();
        }

        for (name, run) in self.runs.iter_mut() {
            if run.image.is_empty() && !self.default_image.is_empty() {
                run.image = self.default_image.clone();
            }

            for (key, value) in &config.metadata {
                if config.override_metadata || !run.metadata.contains_key(key) {
                    run.metadata.insert(key.clone(), value.clone());
                }
            }

            run.name = name.clone();
        }

        self.apply_timeouts(config);
        self.apply_queues(config);

        if self.workdir.is_empty() && !config.workdir.is_empty() {
            self.workdir = config.workdir.clone();
        }

        if self.default_resources.is_empty() && !config.default_resources.is_empty() {
            self.default_resources = config.default_resources;
        }
    }

    fn apply_timeouts(&mut self, config: &RepoConfig) {
        if config.override_timeout && config.global_timeout != 0 {
            for run in self.runs.values_mut() {
                run.timeout = config.global_timeout;
            }
            return;
        }

        for run in self.runs.values_mut() {
            if run.timeout == 0 {
                if self.default_timeout != 0 {
                    run.timeout = self.default_timeout;
                } else if config.global_timeout != 0 {
                    run.timeout = config.global_timeout;
                }
            }
        }
    }

    fn apply_queues(&mut self, config: &RepoConfig) {
        if config.override_queue {
            for run in self.runs.values_mut() {
                run.queue = config.queue().to_string();
            }
            return;
        }

        let fallback = if !self.default_queue.is_empty() {
            self.default_queue.clone()
        } else {
            config.queue().to_string()
        };

        for run in self.runs.values_mut() {
            if run.queue.is_empty() {
                run.queue = fallback.clone();
            }
        }
    }
}

/// Repository-wide configuration, read from the main branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub override_queue: bool,
    /// Run timeout in seconds; zero means none.
    #[serde(default)]
    pub global_timeout: u64,
    #[serde(default)]
    pub override_timeout: bool,
    #[serde(default, rename = "ignore_directories")]
    pub ignore_dirs: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub override_metadata: bool,
    #[serde(default)]
    pub default_image: String,
    #[serde(default)]
    pub default_resources: Resources,
}

impl RepoConfig {
    pub fn parse(buf: &[u8]) -> std::result::Result<Self, DescriptorError> {
        let mut config: RepoConfig =
            serde_yaml::from_slice(buf).map_err(|e| DescriptorError::Parse(e.to_string()))?;
        if config.queue.is_empty() {
            config.queue = DEFAULT_QUEUE.to_string();
        }
        Ok(config)
    }

    /// Queue runs fall back to; `"default"` when unset.
    pub fn queue(&self) -> &str {
        if self.queue.is_empty() {
            DEFAULT_QUEUE
        } else {
            &self.queue
        }
    }

    /// Whether a path lies under one of the ignored directory prefixes.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore_dirs.iter().any(|dir| path.starts_with(dir.as_str()))
    }
}

/// JSON schema for `task.yml`, for editor and linting tooling.
pub fn task_settings_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(TaskSettings)
}

/// JSON schema for `crucible.yml`.
pub fn repo_config_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RepoConfig)
}
