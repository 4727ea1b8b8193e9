//! Test fixtures for creating sample data.

use crucible_core::descriptor::{RepoConfig, TaskSettings};
use crucible_core::ids::SubmissionId;
use crucible_core::naming::run_name;
use crucible_core::ports::Stores;
use crucible_core::repository::{NewRepository, RemoteRepository, Repository};
use crucible_core::run::{NewQueueItem, NewRun, QueueItem};
use crucible_core::submission::{NewRef, NewSubmission, Ref};
use crucible_core::task::{NewTask, Task};

/// Tip of the main branch.
pub const MAIN_SHA: &str = "1111111111111111111111111111111111111111";
/// Tip of a feature branch.
pub const HEAD_SHA: &str = "2222222222222222222222222222222222222222";
/// Another commit, used for second pushes.
pub const OTHER_SHA: &str = "3333333333333333333333333333333333333333";

pub const MAIN_BRANCH: &str = "heads/master";
pub const FEATURE_BRANCH: &str = "heads/feature";

/// Remote metadata for a repository on `master`.
pub fn remote(name: &str) -> RemoteRepository {
    RemoteRepository {
        full_name: name.to_string(),
        default_branch: "master".to_string(),
        private: false,
        fork: false,
        parent: None,
    }
}

/// Remote metadata for a fork of `parent`.
pub fn remote_fork(name: &str, parent: &str) -> RemoteRepository {
    RemoteRepository {
        fork: true,
        parent: Some(parent.to_string()),
        ..remote(name)
    }
}

/// A `task.yml` declaring the named runs.
pub fn task_yaml(runs: &[&str]) -> String {
    task_yaml_with_deps(runs, &[])
}

/// A `task.yml` declaring runs and dependencies.
pub fn task_yaml_with_deps(runs: &[&str], dependencies: &[&str]) -> String {
    let mut yaml = String::from("mountpoint: /tmp\ndefault_image: \"foobar\"\n");

    if !dependencies.is_empty() {
        yaml.push_str("dependencies:\n");
        for dep in dependencies {
            yaml.push_str(&format!("  - {dep}\n"));
        }
    }

    if !runs.is_empty() {
        yaml.push_str("runs:\n");
        for run in runs {
            yaml.push_str(&format!("  {run}:\n    command: [\"/bin/sh\", \"-c\", \"true\"]\n"));
        }
    }
    yaml
}

/// Run names `"{prefix}0".."{prefix}{n-1}"`.
pub fn run_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// Everything a queue scenario needs: an enabled repository with one
/// submission on a feature branch.
pub struct Seeded {
    pub repository: Repository,
    pub base: Ref,
    pub head: Ref,
    pub submission_id: SubmissionId,
}

/// Create an owner and an enabled repository.
pub async fn seed_repository(stores: &Stores, name: &str) -> anyhow::Result<Repository> {
    let (owner, _) = crucible_core::naming::owner_repo(name)?;
    let user = match stores.users.find_by_name(owner).await? {
        Some(user) => user,
        None => stores.users.create(owner).await?,
    };

    let repository = stores
        .repositories
        .create(&NewRepository {
            name: name.to_string(),
            owner_id: user.id,
            private: false,
            disabled: false,
            auto_created: false,
            upstream: remote(name).to_upstream(),
        })
        .await?;
    Ok(repository)
}

/// Seed a repository and a submission testing `head_ref` at [`HEAD_SHA`].
pub async fn seed_submission(stores: &Stores, name: &str, head_ref: &str) -> anyhow::Result<Seeded> {
    let repository = seed_repository(stores, name).await?;

    let base = stores
        .refs
        .create(&NewRef {
            repository_id: repository.id,
            ref_name: MAIN_BRANCH.to_string(),
            sha: MAIN_SHA.to_string(),
        })
        .await?;
    let head = stores
        .refs
        .create(&NewRef {
            repository_id: repository.id,
            ref_name: head_ref.to_string(),
            sha: HEAD_SHA.to_string(),
        })
        .await?;

    let submission = stores
        .submissions
        .create(&NewSubmission {
            base_ref_id: base.id,
            head_ref_id: Some(head.id),
            user_id: Some(repository.owner_id),
            ticket_id: None,
        })
        .await?;

    Ok(Seeded {
        repository,
        base,
        head,
        submission_id: submission.id,
    })
}

/// Create a task at `path` with the given runs and queue them all on `queue`.
pub async fn seed_task(
    stores: &Stores,
    submission_id: SubmissionId,
    path: &str,
    runs: &[&str],
    queue: &str,
) -> anyhow::Result<(Task, Vec<QueueItem>)> {
    let config = RepoConfig {
        queue: queue.to_string(),
        ..Default::default()
    };
    let settings = TaskSettings::parse(task_yaml(runs).as_bytes(), true, &config)?;

    let task = stores
        .tasks
        .create(&NewTask {
            submission_id,
            path: path.to_string(),
            settings,
        })
        .await?;

    let items = task
        .settings
        .runs
        .iter()
        .map(|(name, run)| {
            NewQueueItem::for_run(NewRun {
                task_id: task.id,
                name: run_name(&task.path, name),
                settings: run.clone(),
            })
        })
        .collect();
    let queued = stores.queue.enqueue_many(items).await?;

    Ok((task, queued))
}

/// Names borrowed as `&str` for [`seed_task`].
pub fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}
