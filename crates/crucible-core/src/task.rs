//! Tasks and status rollup.

use crate::descriptor::TaskSettings;
use crate::ids::{SubmissionId, TaskId};
use crate::run::Run;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One task directory under test for a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub submission_id: SubmissionId,
    pub path: String,
    pub settings: TaskSettings,
    pub canceled: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Aggregate status: true when every run succeeded.
    pub status: Option<bool>,
}

impl Task {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub submission_id: SubmissionId,
    pub path: String,
    pub settings: TaskSettings,
}

impl NewTask {
    /// A task must own at least one run; dependency-only tasks are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::Validation("task path is empty".into()));
        }
        let mut settings = self.settings.clone();
        settings.validate(true)?;
        Ok(())
    }
}

/// Aggregate status of a task from the current state of its runs.
///
/// `None` while any run is outstanding; otherwise the logical AND of every
/// run's status.
pub fn rollup(runs: &[Run]) -> Option<bool> {
    let mut status = true;
    for run in runs {
        match (run.status, run.finished_at) {
            (Some(ok), Some(_)) => status &= ok,
            _ => return None,
        }
    }
    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{RepoConfig, RunSettings};
    use crate::ids::RunId;

    fn run(id: i64, status: Option<bool>) -> Run {
        Run {
            id: RunId::new(id),
            task_id: TaskId::new(1),
            name: format!("*root*:r{id}"),
            settings: RunSettings::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: status.map(|_| Utc::now()),
            status,
            ran_on: None,
        }
    }

    #[test]
    fn test_rollup_waits_for_every_run() {
        assert_eq!(rollup(&[run(1, Some(true)), run(2, None)]), None);
    }

    #[test]
    fn test_rollup_ands_statuses() {
        assert_eq!(rollup(&[run(1, Some(true)), run(2, Some(true))]), Some(true));
        assert_eq!(rollup(&[run(1, Some(false)), run(2, Some(true))]), Some(false));
        assert_eq!(rollup(&[run(1, Some(true)), run(2, Some(false))]), Some(false));
    }

    #[test]
    fn test_rollup_needs_finish_time() {
        let mut r = run(1, Some(true));
        r.finished_at = None;
        assert_eq!(rollup(&[r]), None);
    }

    #[test]
    fn test_dependency_only_task_is_invalid() {
        let settings = TaskSettings::parse(
            b"dependencies: [foo]\n",
            false,
            &RepoConfig::default(),
        )
        .unwrap();
        let task = NewTask {
            submission_id: SubmissionId::new(1),
            path: "bar".into(),
            settings,
        };
        assert!(task.validate().is_err());
    }
}
