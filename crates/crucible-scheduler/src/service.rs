//! Queue and cancellation operations exposed to workers and operators.
//!
//! Wraps the stores and reports each state change to the source host through
//! the status notifier.

use crate::config::SchedulerConfig;
use crate::notifier::StatusNotifier;
use crucible_core::Result;
use crucible_core::ids::{RepositoryId, RunId, SubmissionId, TaskId};
use crucible_core::ports::{CommitStatus, StatusState, Stores};
use crucible_core::run::QueueItem;
use std::sync::Arc;
use tracing::warn;

const RUN_CANCELED: &str = "The run was canceled";
const RUN_COMPLETED: &str = "The run completed!";

pub struct QueueService {
    stores: Stores,
    notifier: Arc<StatusNotifier>,
    config: SchedulerConfig,
}

impl QueueService {
    pub fn new(stores: Stores, notifier: Arc<StatusNotifier>, config: SchedulerConfig) -> Self {
        Self {
            stores,
            notifier,
            config,
        }
    }

    /// Claim the next item for a worker. `None` means no work right now.
    pub async fn dequeue_next(&self, queue_name: &str, worker: &str) -> Result<Option<QueueItem>> {
        let item = self.stores.queue.dequeue_next(queue_name, worker).await?;
        if let Some(item) = &item {
            self.report(item.run.id, StatusState::Started).await;
        }
        Ok(item)
    }

    pub async fn set_run_status(&self, run_id: RunId, success: bool) -> Result<()> {
        self.stores.runs.set_status(run_id, success).await?;
        self.report(
            run_id,
            StatusState::Finished {
                success,
                message: RUN_COMPLETED.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<Vec<RunId>> {
        let forced = self.stores.tasks.cancel(task_id).await?;
        self.report_canceled(&forced).await;
        Ok(forced)
    }

    /// Cancel the task owning a run.
    pub async fn cancel_run(&self, run_id: RunId) -> Result<Vec<RunId>> {
        let forced = self.stores.runs.cancel(run_id).await?;
        self.report_canceled(&forced).await;
        Ok(forced)
    }

    pub async fn cancel_submission(&self, submission_id: SubmissionId) -> Result<Vec<TaskId>> {
        let canceled = self.stores.submissions.cancel(submission_id).await?;
        self.report_canceled_tasks(&canceled).await;
        Ok(canceled)
    }

    pub async fn cancel_ref(
        &self,
        repository_id: RepositoryId,
        ref_name: &str,
    ) -> Result<Vec<TaskId>> {
        let canceled = self
            .stores
            .tasks
            .cancel_ref_by_name(repository_id, ref_name)
            .await?;
        self.report_canceled_tasks(&canceled).await;
        Ok(canceled)
    }

    /// Cancel outstanding work for a pull request.
    pub async fn cancel_ticket(&self, repository: &str, ticket_id: i64) -> Result<Vec<TaskId>> {
        let canceled = self
            .stores
            .tasks
            .cancel_for_ticket(repository, ticket_id)
            .await?;
        self.report_canceled_tasks(&canceled).await;
        Ok(canceled)
    }

    async fn report_canceled(&self, runs: &[RunId]) {
        for run_id in runs {
            self.report(
                *run_id,
                StatusState::Error {
                    message: RUN_CANCELED.to_string(),
                },
            )
            .await;
        }
    }

    /// Report the runs a task cancellation forced to failed: those finished
    /// at the same instant as the task.
    async fn report_canceled_tasks(&self, tasks: &[TaskId]) {
        for task_id in tasks {
            let loaded = async {
                let task = self.stores.tasks.get(*task_id).await?;
                let runs = self.stores.tasks.runs(*task_id).await?;
                Ok::<_, crucible_core::Error>((task, runs))
            }
            .await;

            match loaded {
                Ok((Some(task), runs)) => {
                    let forced: Vec<RunId> = runs
                        .into_iter()
                        .filter(|r| r.status == Some(false) && r.finished_at == task.finished_at)
                        .map(|r| r.id)
                        .collect();
                    self.report_canceled(&forced).await;
                }
                Ok((None, _)) => {}
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to load canceled runs"),
            }
        }
    }

    /// Post a status for a run. Failures are logged only.
    async fn report(&self, run_id: RunId, state: StatusState) {
        let detail = match self.stores.runs.detail(run_id).await {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                warn!(run_id = %run_id, "Run vanished before its status could be posted");
                return;
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load run detail");
                return;
            }
        };

        let Some((owner, repo)) = detail.repository.split_once('/') else {
            warn!(repository = %detail.repository, "Invalid repository name; not posting status");
            return;
        };

        self.notifier.notify(CommitStatus {
            owner: owner.to_string(),
            repo: repo.to_string(),
            context: detail.run.name,
            sha: detail.head_sha,
            target_url: format!("{}/log/{}", self.config.base_url, run_id.get()),
            state,
        });
    }
}
