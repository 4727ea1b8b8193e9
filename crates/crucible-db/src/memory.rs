//! In-process store.
//!
//! Implements every store port over a single mutex-guarded state with the
//! same semantics as the PostgreSQL store: holding the lock stands in for a
//! transaction, so each operation is atomic and dequeues are totally ordered.
//! Used by tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crucible_core::ids::*;
use crucible_core::ports::*;
use crucible_core::repository::{NewRepository, Repository, User};
use crucible_core::run::{NewQueueItem, QueueItem, Run, RunDetail, queue_or_default};
use crucible_core::submission::{NewRef, NewSubmission, Ref, Submission};
use crucible_core::task::{NewTask, Task, rollup};
use crucible_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct QueueEntry {
    id: QueueItemId,
    run_id: RunId,
    queue_name: String,
    running: bool,
    running_on: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    seq: i64,
    users: BTreeMap<UserId, User>,
    repositories: BTreeMap<RepositoryId, Repository>,
    refs: BTreeMap<RefId, Ref>,
    submissions: BTreeMap<SubmissionId, Submission>,
    tasks: BTreeMap<TaskId, Task>,
    runs: BTreeMap<RunId, Run>,
    queue: BTreeMap<QueueItemId, QueueEntry>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn queue_item(&self, entry: &QueueEntry) -> Result<QueueItem> {
        let run = self
            .runs
            .get(&entry.run_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("queue item {} has no run", entry.id)))?;
        Ok(QueueItem {
            id: entry.id,
            run,
            queue_name: entry.queue_name.clone(),
            running: entry.running,
            running_on: entry.running_on.clone(),
            started_at: entry.started_at,
        })
    }

    fn task_runs(&self, task_id: TaskId) -> Vec<Run> {
        self.runs
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    fn ref_repository(&self, ref_id: RefId) -> Option<&Repository> {
        self.refs
            .get(&ref_id)
            .and_then(|r| self.repositories.get(&r.repository_id))
    }

    fn finish_run(&mut self, run_id: RunId, status: bool, now: DateTime<Utc>) -> Result<TaskId> {
        let run = self
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::not_found(run_id))?;
        if run.status.is_some() {
            return Err(Error::Conflict(format!("{run_id} already has a status")));
        }
        run.status = Some(status);
        run.finished_at = Some(now);
        let task_id = run.task_id;

        self.queue.retain(|_, e| e.run_id != run_id);
        Ok(task_id)
    }

    fn rollup_task(&mut self, task_id: TaskId, now: DateTime<Utc>) -> Result<Option<bool>> {
        let runs = self.task_runs(task_id);
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::not_found(task_id))?;
        if task.is_finished() {
            return Ok(None);
        }

        let status = rollup(&runs);
        if let Some(status) = status {
            task.status = Some(status);
            task.finished_at = Some(now);
        }
        Ok(status)
    }

    fn cancel_task(&mut self, task_id: TaskId, now: DateTime<Utc>) -> Result<Vec<RunId>> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| Error::not_found(task_id))?;
        if task.is_finished() {
            return Err(Error::Conflict(format!("{task_id} is already finished")));
        }

        let outstanding: Vec<RunId> = self
            .task_runs(task_id)
            .into_iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.id)
            .collect();
        for run_id in &outstanding {
            self.finish_run(*run_id, false, now)?;
        }

        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.canceled = true;
            task.status = Some(false);
            task.finished_at = Some(now);
        }
        Ok(outstanding)
    }

    fn cancel_tasks(&mut self, ids: Vec<TaskId>) -> Result<Vec<TaskId>> {
        let now = Utc::now();
        let mut canceled = Vec::with_capacity(ids.len());
        for task_id in ids {
            match self.cancel_task(task_id, now) {
                Ok(_) => canceled.push(task_id),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(task_id = %task_id, "Task finished before it could be canceled");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(canceled)
    }
}

/// Store ports over process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every store port backed by this instance.
    pub fn stores(&self) -> Stores {
        Stores {
            users: Arc::new(self.clone()),
            repositories: Arc::new(self.clone()),
            refs: Arc::new(self.clone()),
            submissions: Arc::new(self.clone()),
            tasks: Arc::new(self.clone()),
            runs: Arc::new(self.clone()),
            queue: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_by_name(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn create(&self, username: &str) -> Result<User> {
        if username.is_empty() {
            return Err(Error::Validation("username is empty".into()));
        }
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == username) {
            return Err(Error::Conflict(format!("user {username:?} exists")));
        }
        let user = User {
            id: UserId::new(state.next_id()),
            username: username.to_string(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn get(&self, id: RepositoryId) -> Result<Option<Repository>> {
        Ok(self.state.lock().await.repositories.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Repository>> {
        let state = self.state.lock().await;
        Ok(state.repositories.values().find(|r| r.name == name).cloned())
    }

    async fn create(&self, repository: &NewRepository) -> Result<Repository> {
        let mut state = self.state.lock().await;
        if state.repositories.values().any(|r| r.name == repository.name) {
            return Err(Error::Conflict(format!(
                "repository {:?} exists",
                repository.name
            )));
        }
        if !state.users.contains_key(&repository.owner_id) {
            return Err(Error::not_found(repository.owner_id));
        }

        let created = Repository {
            id: RepositoryId::new(state.next_id()),
            name: repository.name.clone(),
            owner_id: repository.owner_id,
            private: repository.private,
            disabled: repository.disabled,
            auto_created: repository.auto_created,
            upstream: repository.upstream.clone(),
            created_at: Utc::now(),
        };
        state.repositories.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_disabled(&self, id: RepositoryId, disabled: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let repository = state
            .repositories
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id))?;
        repository.disabled = disabled;
        Ok(())
    }
}

#[async_trait]
impl RefStore for MemoryStore {
    async fn find(&self, repository: &str, sha: &str) -> Result<Option<Ref>> {
        let state = self.state.lock().await;
        Ok(state
            .refs
            .values()
            .find(|r| {
                r.sha == sha
                    && state
                        .repositories
                        .get(&r.repository_id)
                        .is_some_and(|repo| repo.name == repository)
            })
            .cloned())
    }

    async fn get(&self, id: RefId) -> Result<Option<Ref>> {
        Ok(self.state.lock().await.refs.get(&id).cloned())
    }

    async fn create(&self, new: &NewRef) -> Result<Ref> {
        new.validate()?;

        let mut state = self.state.lock().await;
        if !state.repositories.contains_key(&new.repository_id) {
            return Err(Error::not_found(new.repository_id));
        }
        if state
            .refs
            .values()
            .any(|r| r.repository_id == new.repository_id && r.sha == new.sha)
        {
            return Err(Error::Conflict(format!("ref for {} exists", new.sha)));
        }

        let created = Ref {
            id: RefId::new(state.next_id()),
            repository_id: new.repository_id,
            ref_name: new.ref_name.clone(),
            sha: new.sha.clone(),
        };
        state.refs.insert(created.id, created.clone());
        Ok(created)
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create(&self, new: &NewSubmission) -> Result<Submission> {
        let mut state = self.state.lock().await;
        for ref_id in std::iter::once(new.base_ref_id).chain(new.head_ref_id) {
            if !state.refs.contains_key(&ref_id) {
                return Err(Error::not_found(ref_id));
            }
        }

        let created = Submission {
            id: SubmissionId::new(state.next_id()),
            base_ref_id: new.base_ref_id,
            head_ref_id: new.head_ref_id,
            user_id: new.user_id,
            ticket_id: new.ticket_id,
            created_at: Utc::now(),
        };
        state.submissions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>> {
        Ok(self.state.lock().await.submissions.get(&id).cloned())
    }

    async fn tasks(&self, id: SubmissionId) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.submission_id == id)
            .cloned()
            .collect())
    }

    async fn runs(&self, id: SubmissionId) -> Result<Vec<Run>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|r| {
                state
                    .tasks
                    .get(&r.task_id)
                    .is_some_and(|t| t.submission_id == id)
            })
            .cloned()
            .collect())
    }

    async fn cancel(&self, id: SubmissionId) -> Result<Vec<TaskId>> {
        let mut state = self.state.lock().await;
        if !state.submissions.contains_key(&id) {
            return Err(Error::not_found(id));
        }

        let ids: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.submission_id == id && !t.is_finished())
            .map(|t| t.id)
            .collect();

        let now = Utc::now();
        let mut canceled = Vec::new();
        for task_id in ids {
            match state.cancel_task(task_id, now) {
                Ok(_) => canceled.push(task_id),
                Err(e) => {
                    tracing::warn!(submission_id = %id, task_id = %task_id, error = %e, "Failed to cancel task");
                }
            }
        }
        Ok(canceled)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, new: &NewTask) -> Result<Task> {
        new.validate()?;

        let mut state = self.state.lock().await;
        if !state.submissions.contains_key(&new.submission_id) {
            return Err(Error::not_found(new.submission_id));
        }

        let created = Task {
            id: TaskId::new(state.next_id()),
            submission_id: new.submission_id,
            path: new.path.clone(),
            settings: new.settings.clone(),
            canceled: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: None,
        };
        state.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn runs(&self, id: TaskId) -> Result<Vec<Run>> {
        Ok(self.state.lock().await.task_runs(id))
    }

    async fn cancel(&self, id: TaskId) -> Result<Vec<RunId>> {
        let forced = self.state.lock().await.cancel_task(id, Utc::now())?;
        tracing::info!(task_id = %id, runs = forced.len(), "Task canceled");
        Ok(forced)
    }

    async fn cancel_ref_by_name(
        &self,
        repository_id: RepositoryId,
        ref_name: &str,
    ) -> Result<Vec<TaskId>> {
        let mut state = self.state.lock().await;
        let repository = state
            .repositories
            .get(&repository_id)
            .ok_or_else(|| Error::not_found(repository_id))?;
        if repository.main_branch() == ref_name {
            tracing::debug!(repository = %repository.name, ref_name, "Not canceling the main branch");
            return Ok(Vec::new());
        }

        let ids: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| !t.is_finished())
            .filter(|t| {
                state
                    .submissions
                    .get(&t.submission_id)
                    .and_then(|s| s.head_ref_id)
                    .and_then(|id| state.refs.get(&id))
                    .is_some_and(|r| r.repository_id == repository_id && r.ref_name == ref_name)
            })
            .map(|t| t.id)
            .collect();

        state.cancel_tasks(ids)
    }

    async fn cancel_for_ticket(&self, repository: &str, ticket_id: i64) -> Result<Vec<TaskId>> {
        let mut state = self.state.lock().await;
        let ids: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| !t.is_finished())
            .filter(|t| {
                state.submissions.get(&t.submission_id).is_some_and(|s| {
                    s.ticket_id == Some(ticket_id)
                        && state
                            .ref_repository(s.base_ref_id)
                            .is_some_and(|repo| repo.name == repository)
                })
            })
            .map(|t| t.id)
            .collect();

        state.cancel_tasks(ids)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn get(&self, id: RunId) -> Result<Option<Run>> {
        Ok(self.state.lock().await.runs.get(&id).cloned())
    }

    async fn detail(&self, id: RunId) -> Result<Option<RunDetail>> {
        let state = self.state.lock().await;
        let Some(run) = state.runs.get(&id) else {
            return Ok(None);
        };
        let submission = state
            .tasks
            .get(&run.task_id)
            .and_then(|t| state.submissions.get(&t.submission_id))
            .ok_or_else(|| Error::Internal(format!("{id} has no submission")))?;
        let repository = state
            .ref_repository(submission.base_ref_id)
            .ok_or_else(|| Error::Internal(format!("{id} has no repository")))?;
        let head = submission
            .head_ref_id
            .unwrap_or(submission.base_ref_id);
        let head_sha = state
            .refs
            .get(&head)
            .map(|r| r.sha.clone())
            .ok_or_else(|| Error::Internal(format!("{id} has no head ref")))?;

        Ok(Some(RunDetail {
            run: run.clone(),
            repository: repository.name.clone(),
            head_sha,
        }))
    }

    async fn set_status(&self, id: RunId, status: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let task_id = state.finish_run(id, status, now)?;
        state.rollup_task(task_id, now)?;

        tracing::info!(run_id = %id, status, "Run finished");
        Ok(())
    }

    async fn cancel(&self, id: RunId) -> Result<Vec<RunId>> {
        let mut state = self.state.lock().await;
        let task_id = state
            .runs
            .get(&id)
            .map(|r| r.task_id)
            .ok_or_else(|| Error::not_found(id))?;
        state.cancel_task(task_id, Utc::now())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue_many(&self, items: Vec<NewQueueItem>) -> Result<Vec<QueueItem>> {
        let mut state = self.state.lock().await;
        for item in &items {
            item.run.validate()?;
            if !state.tasks.contains_key(&item.run.task_id) {
                return Err(Error::not_found(item.run.task_id));
            }
        }

        let now = Utc::now();
        let mut queued = Vec::with_capacity(items.len());
        for item in items {
            let run = Run {
                id: RunId::new(state.next_id()),
                task_id: item.run.task_id,
                name: item.run.name,
                settings: item.run.settings,
                created_at: now,
                started_at: None,
                finished_at: None,
                status: None,
                ran_on: None,
            };
            let entry = QueueEntry {
                id: QueueItemId::new(state.next_id()),
                run_id: run.id,
                queue_name: queue_or_default(&item.queue_name).to_string(),
                running: false,
                running_on: None,
                started_at: None,
            };
            state.runs.insert(run.id, run);
            queued.push(state.queue_item(&entry)?);
            state.queue.insert(entry.id, entry);
        }

        tracing::debug!(count = queued.len(), "Enqueued runs");
        Ok(queued)
    }

    async fn dequeue_next(&self, queue_name: &str, worker: &str) -> Result<Option<QueueItem>> {
        if worker.is_empty() {
            return Err(Error::Validation("worker identity is required".into()));
        }
        let queue_name = queue_or_default(queue_name);

        let mut state = self.state.lock().await;
        let Some(entry_id) = state
            .queue
            .values()
            .find(|e| e.queue_name == queue_name && !e.running)
            .map(|e| e.id)
        else {
            return Ok(None);
        };

        let now = Utc::now();
        let Some(entry) = state.queue.get_mut(&entry_id) else {
            return Ok(None);
        };
        entry.running = true;
        entry.running_on = Some(worker.to_string());
        entry.started_at = Some(now);
        let run_id = entry.run_id;

        let task_id = {
            let run = state
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| Error::not_found(run_id))?;
            run.started_at = Some(now);
            run.ran_on = Some(worker.to_string());
            run.task_id
        };
        if let Some(task) = state.tasks.get_mut(&task_id) {
            if task.started_at.is_none() {
                task.started_at = Some(now);
            }
        }

        let entry = state.queue[&entry_id].clone();
        let item = state.queue_item(&entry)?;

        tracing::info!(queue = queue_name, worker, run_id = %run_id, "Queue item claimed");
        Ok(Some(item))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        state
            .queue
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|e| state.queue_item(e))
            .collect()
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.state.lock().await.queue.len() as i64)
    }

    async fn list_for_repository(
        &self,
        repository: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        state
            .queue
            .values()
            .filter(|e| {
                state
                    .runs
                    .get(&e.run_id)
                    .and_then(|r| state.tasks.get(&r.task_id))
                    .and_then(|t| state.submissions.get(&t.submission_id))
                    .and_then(|s| state.ref_repository(s.base_ref_id))
                    .is_some_and(|repo| repo.name == repository)
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|e| state.queue_item(e))
            .collect()
    }

    async fn stale_claims(&self, older_than: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        let mut stale: Vec<QueueItem> = state
            .queue
            .values()
            .filter(|e| e.running && e.started_at.is_some_and(|at| at < older_than))
            .map(|e| state.queue_item(e))
            .collect::<Result<_>>()?;
        stale.retain(|item| item.run.finished_at.is_none());
        stale.sort_by_key(|item| item.started_at);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::descriptor::{RunSettings, TaskSettings};
    use crucible_core::run::NewRun;
    use pretty_assertions::assert_eq;

    const SHA: &str = "be3d26c478991039e951097f2c99f56b55396940";

    async fn seed(store: &MemoryStore) -> (Repository, Submission) {
        let user = UserStore::create(store, "erikh").await.unwrap();
        let repo = RepositoryStore::create(
            store,
            &NewRepository {
                name: "erikh/foobar".into(),
                owner_id: user.id,
                private: false,
                disabled: false,
                auto_created: false,
                upstream: serde_json::json!({"default_branch": "master"}),
            },
        )
        .await
        .unwrap();
        let head = RefStore::create(
            store,
            &NewRef {
                repository_id: repo.id,
                ref_name: "heads/feature".into(),
                sha: SHA.into(),
            },
        )
        .await
        .unwrap();
        let sub = SubmissionStore::create(
            store,
            &NewSubmission {
                base_ref_id: head.id,
                head_ref_id: Some(head.id),
                user_id: None,
                ticket_id: None,
            },
        )
        .await
        .unwrap();
        (repo, sub)
    }

    fn run_settings(queue: &str) -> RunSettings {
        RunSettings {
            command: vec!["make".into()],
            image: "rust".into(),
            queue: queue.into(),
            ..Default::default()
        }
    }

    async fn task_with_runs(store: &MemoryStore, sub: &Submission, n: usize) -> Task {
        let mut settings = TaskSettings {
            mountpoint: "/tmp".into(),
            ..Default::default()
        };
        settings.runs.insert("a".into(), run_settings("default"));
        let task = TaskStore::create(
            store,
            &NewTask {
                submission_id: sub.id,
                path: ".".into(),
                settings,
            },
        )
        .await
        .unwrap();

        let items = (0..n)
            .map(|i| {
                NewQueueItem::for_run(NewRun {
                    task_id: task.id,
                    name: format!("*root*:r{i}"),
                    settings: run_settings("default"),
                })
            })
            .collect();
        store.enqueue_many(items).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo_and_empty_is_none() {
        let store = MemoryStore::new();
        let (_, sub) = seed(&store).await;
        task_with_runs(&store, &sub, 2).await;

        let first = store.dequeue_next("", "w1").await.unwrap().unwrap();
        let second = store.dequeue_next("default", "w2").await.unwrap().unwrap();
        assert!(first.id < second.id);
        assert_eq!(first.running_on.as_deref(), Some("w1"));
        assert!(store.dequeue_next("default", "w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_requires_worker() {
        let store = MemoryStore::new();
        let err = store.dequeue_next("default", "").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_set_status_rolls_up_once() {
        let store = MemoryStore::new();
        let (_, sub) = seed(&store).await;
        let task = task_with_runs(&store, &sub, 2).await;
        let runs = TaskStore::runs(&store, task.id).await.unwrap();

        store.set_status(runs[0].id, true).await.unwrap();
        let t = TaskStore::get(&store, task.id).await.unwrap().unwrap();
        assert_eq!(t.status, None);

        store.set_status(runs[1].id, false).await.unwrap();
        let t = TaskStore::get(&store, task.id).await.unwrap().unwrap();
        assert_eq!(t.status, Some(false));
        assert!(t.finished_at.is_some());

        let err = store.set_status(runs[1].id, true).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_task_forces_outstanding_runs() {
        let store = MemoryStore::new();
        let (_, sub) = seed(&store).await;
        let task = task_with_runs(&store, &sub, 3).await;
        store.dequeue_next("default", "w1").await.unwrap();

        let forced = TaskStore::cancel(&store, task.id).await.unwrap();
        assert_eq!(forced.len(), 3);

        let t = TaskStore::get(&store, task.id).await.unwrap().unwrap();
        assert!(t.canceled);
        assert_eq!(t.status, Some(false));
        assert_eq!(store.count().await.unwrap(), 0);

        assert!(TaskStore::cancel(&store, task.id).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_cancel_ref_skips_main_branch() {
        let store = MemoryStore::new();
        let (repo, sub) = seed(&store).await;
        task_with_runs(&store, &sub, 1).await;

        let none = store.cancel_ref_by_name(repo.id, "heads/master").await.unwrap();
        assert!(none.is_empty());

        let some = store.cancel_ref_by_name(repo.id, "heads/feature").await.unwrap();
        assert_eq!(some.len(), 1);
    }
}
