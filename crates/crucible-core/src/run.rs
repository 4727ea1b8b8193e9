//! Runs and queue items.

use crate::descriptor::{DEFAULT_QUEUE, RunSettings};
use crate::ids::{QueueItemId, RunId, TaskId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named sub-job of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub task_id: TaskId,
    /// `<dir or *root*>:<run name>`.
    pub name: String,
    pub settings: RunSettings,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<bool>,
    /// Identity of the worker that claimed the run.
    pub ran_on: Option<String>,
}

impl Run {
    /// Whether the run has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub task_id: TaskId,
    pub name: String,
    pub settings: RunSettings,
}

impl NewRun {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("run name is empty".into()));
        }
        self.settings.validate()?;
        Ok(())
    }
}

/// The claimable queue entry for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub run: Run,
    pub queue_name: String,
    pub running: bool,
    pub running_on: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// A run to be stored and enqueued in the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub queue_name: String,
    pub run: NewRun,
}

impl NewQueueItem {
    /// Queue item for a run, targeting the queue its settings name.
    pub fn for_run(run: NewRun) -> Self {
        let queue_name = queue_or_default(&run.settings.queue).to_string();
        Self { queue_name, run }
    }
}

/// An unset queue name means the default partition.
pub fn queue_or_default(queue: &str) -> &str {
    if queue.is_empty() { DEFAULT_QUEUE } else { queue }
}

/// A run with the repository and SHA it tests, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub run: Run,
    pub repository: String,
    pub head_sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RunSettings {
        RunSettings {
            command: vec!["make".into()],
            image: "rust".into(),
            queue: String::new(),
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_item_defaults_queue() {
        let item = NewQueueItem::for_run(NewRun {
            task_id: TaskId::new(1),
            name: "*root*:build".into(),
            settings: settings(),
        });
        assert_eq!(item.queue_name, "default");
    }

    #[test]
    fn test_new_run_requires_name_and_settings() {
        let mut settings = settings();
        settings.queue = "default".into();

        let run = NewRun {
            task_id: TaskId::new(1),
            name: String::new(),
            settings: settings.clone(),
        };
        assert!(run.validate().is_err());

        let run = NewRun {
            name: "foo:test".into(),
            ..run
        };
        run.validate().unwrap();

        let run = NewRun {
            settings: RunSettings::default(),
            ..run
        };
        assert!(run.validate().is_err());
    }
}
