//! Port traits (hexagonal architecture).
//!
//! The store traits are implemented by `crucible-db`; [`ChangeSource`] is
//! implemented by a source-host client outside this workspace.

use crate::ids::*;
use crate::repository::{NewRepository, RemoteRepository, Repository, User};
use crate::run::{NewQueueItem, QueueItem, Run, RunDetail};
use crate::submission::{NewRef, NewSubmission, Ref, Submission};
use crate::task::{NewTask, Task};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>>;

    async fn find_by_name(&self, username: &str) -> Result<Option<User>>;

    async fn create(&self, username: &str) -> Result<User>;
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get(&self, id: RepositoryId) -> Result<Option<Repository>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Repository>>;

    /// Register a repository. Conflict if the name is taken.
    async fn create(&self, repository: &NewRepository) -> Result<Repository>;

    async fn set_disabled(&self, id: RepositoryId, disabled: bool) -> Result<()>;
}

#[async_trait]
pub trait RefStore: Send + Sync {
    /// Find a ref by repository name and SHA.
    async fn find(&self, repository: &str, sha: &str) -> Result<Option<Ref>>;

    async fn get(&self, id: RefId) -> Result<Option<Ref>>;

    /// Store a ref. Conflict if one exists for the same repository and SHA.
    async fn create(&self, new: &NewRef) -> Result<Ref>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create(&self, new: &NewSubmission) -> Result<Submission>;

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>>;

    async fn tasks(&self, id: SubmissionId) -> Result<Vec<Task>>;

    async fn runs(&self, id: SubmissionId) -> Result<Vec<Run>>;

    /// Cancel every unfinished task of the submission. A failure on one task
    /// is logged and the rest are still canceled. Returns the canceled tasks.
    async fn cancel(&self, id: SubmissionId) -> Result<Vec<TaskId>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, new: &NewTask) -> Result<Task>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    async fn runs(&self, id: TaskId) -> Result<Vec<Run>>;

    /// Force outstanding runs to failed, then mark the task canceled and
    /// failed. Conflict if the task has already finished. Returns the runs
    /// that were forced to failed.
    async fn cancel(&self, id: TaskId) -> Result<Vec<RunId>>;

    /// Cancel unfinished tasks whose submission's head ref matches. No-op on
    /// the repository's main branch. Returns the canceled tasks.
    async fn cancel_ref_by_name(
        &self,
        repository_id: RepositoryId,
        ref_name: &str,
    ) -> Result<Vec<TaskId>>;

    /// Cancel unfinished tasks of every submission for a pull request.
    async fn cancel_for_ticket(&self, repository: &str, ticket_id: i64) -> Result<Vec<TaskId>>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get(&self, id: RunId) -> Result<Option<Run>>;

    async fn detail(&self, id: RunId) -> Result<Option<RunDetail>>;

    /// Record a terminal status, remove the queue item and roll the task up.
    /// Conflict if the run is already terminal.
    async fn set_status(&self, id: RunId, status: bool) -> Result<()>;

    /// Cancel the task owning the run.
    async fn cancel(&self, id: RunId) -> Result<Vec<RunId>>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Store the runs and their queue items in one transaction.
    async fn enqueue_many(&self, items: Vec<NewQueueItem>) -> Result<Vec<QueueItem>>;

    /// Claim the oldest unclaimed item in the queue. `None` when the queue
    /// has no claimable work.
    async fn dequeue_next(&self, queue_name: &str, worker: &str) -> Result<Option<QueueItem>>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<QueueItem>>;

    async fn count(&self) -> Result<i64>;

    async fn list_for_repository(
        &self,
        repository: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueItem>>;

    /// Items claimed before `older_than` whose runs have not finished.
    async fn stale_claims(&self, older_than: DateTime<Utc>) -> Result<Vec<QueueItem>>;
}

/// All store ports, bundled for injection.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub repositories: Arc<dyn RepositoryStore>,
    pub refs: Arc<dyn RefStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub runs: Arc<dyn RunStore>,
    pub queue: Arc<dyn QueueStore>,
}

/// State of a commit status marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Started,
    Finished { success: bool, message: String },
    Error { message: String },
}

/// A commit status marker posted to the source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub owner: String,
    pub repo: String,
    /// Status context, the run name.
    pub context: String,
    pub sha: String,
    pub target_url: String,
    pub state: StatusState,
}

/// The source-control host: files, diffs, refs, statuses and comments.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn repository(&self, name: &str) -> Result<RemoteRepository>;

    /// Paths changed between two SHAs.
    async fn diff_files(&self, repository: &str, base: &str, head: &str) -> Result<Vec<String>>;

    /// Every path present at a SHA.
    async fn all_files(&self, repository: &str, sha: &str) -> Result<Vec<String>>;

    /// File content at a SHA or ref. NotFound when the file is missing.
    async fn fetch_file(&self, repository: &str, sha: &str, path: &str) -> Result<Vec<u8>>;

    async fn refs_for_sha(&self, repository: &str, sha: &str) -> Result<Vec<String>>;

    async fn sha_for_ref(&self, repository: &str, ref_name: &str) -> Result<String>;

    async fn post_status(&self, status: &CommitStatus) -> Result<()>;

    async fn post_comment(&self, repository: &str, ticket_id: i64, text: &str) -> Result<()>;

    async fn clear_statuses(&self, repository: &str, sha: &str) -> Result<()>;
}
