//! Submission pipeline: turn a change event into queued runs.

use crate::config::SchedulerConfig;
use crate::discovery::{DiscoveryRequest, TaskDiscovery};
use crate::materializer::{DescriptorSource, Materializer};
use crate::notifier::StatusNotifier;
use crucible_core::descriptor::{REPO_CONFIG_FILENAME, RepoConfig};
use crucible_core::ids::UserId;
use crucible_core::naming::{is_sha, is_zero_sha, owner_repo};
use crucible_core::ports::{ChangeSource, CommitStatus, StatusState, Stores};
use crucible_core::repository::{NewRepository, RemoteRepository, Repository};
use crucible_core::run::QueueItem;
use crucible_core::submission::{NewRef, NewSubmission, Ref, SubmissionRequest};
use crucible_core::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Attempts at registering a fork before giving up.
const FORK_ATTEMPTS: usize = 3;

/// Repositories and refs resolved for one submission.
struct Resolved {
    parent: Repository,
    remote_parent: RemoteRepository,
    fork: Repository,
    head: Ref,
    base: Ref,
    user_id: Option<UserId>,
}

pub struct SubmissionProcessor {
    stores: Stores,
    source: Arc<dyn ChangeSource>,
    notifier: Arc<StatusNotifier>,
    discovery: TaskDiscovery,
    materializer: Materializer,
    config: SchedulerConfig,
}

impl SubmissionProcessor {
    pub fn new(
        stores: Stores,
        source: Arc<dyn ChangeSource>,
        notifier: Arc<StatusNotifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            discovery: TaskDiscovery::new(source.clone()),
            materializer: Materializer::new(source.clone(), stores.tasks.clone()),
            stores,
            source,
            notifier,
            config,
        }
    }

    /// Process a change event and enqueue the runs it requires.
    ///
    /// Discovery and expansion failures abort the submission before anything
    /// is queued.
    pub async fn submit(&self, mut request: SubmissionRequest) -> Result<Vec<QueueItem>> {
        let started = Instant::now();
        request.validate()?;

        info!(
            parent = %request.parent,
            fork = %request.fork,
            head = %request.head_sha,
            manual = request.manual,
            all = request.all,
            "Processing submission"
        );

        let resolved = self.resolve(&mut request).await?;
        let main_branch = resolved.remote_parent.main_branch();
        let config = self.repo_config(&resolved.parent.name, &main_branch).await?;

        let exhaustive = (request.all && request.manual)
            || (resolved.head.repository_id == resolved.parent.id
                && resolved.head.ref_name == main_branch);

        let dirs = self
            .discovery
            .discover(
                &DiscoveryRequest {
                    parent: &resolved.parent.name,
                    fork: &resolved.fork.name,
                    base_sha: &resolved.base.sha,
                    head_sha: &resolved.head.sha,
                    exhaustive,
                },
                &config,
            )
            .await?;

        self.clear_previous(&resolved).await;

        let submission = self
            .stores
            .submissions
            .create(&NewSubmission {
                base_ref_id: resolved.base.id,
                head_ref_id: Some(resolved.head.id),
                user_id: resolved.user_id,
                ticket_id: request.ticket_id,
            })
            .await?;

        let from = DescriptorSource {
            repository: &resolved.fork.name,
            sha: &resolved.head.sha,
            parent: &resolved.parent.name,
            ticket_id: request.ticket_id,
            config: &config,
        };
        let expanded = self.materializer.expand(&from, &dirs).await?;
        let items = self.materializer.materialize(submission.id, expanded).await?;
        let queued = self.stores.queue.enqueue_many(items).await?;

        self.post_pending(&resolved, &queued);

        info!(
            submission_id = %submission.id,
            repository = %resolved.parent.name,
            sha = %resolved.head.sha,
            runs = queued.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Submission queued"
        );
        Ok(queued)
    }

    async fn resolve(&self, request: &mut SubmissionRequest) -> Result<Resolved> {
        let user_id = self.submitter(request).await?;

        if request.manual && request.parent.is_empty() {
            request.parent = self.select_parent(&request.fork).await?;
        }

        let parent = self
            .stores
            .repositories
            .get_by_name(&request.parent)
            .await?
            .ok_or_else(|| Error::not_found(format!("repository {}", request.parent)))?;
        if parent.disabled {
            return Err(Error::Validation("repository is not enabled".into()));
        }

        let remote_parent = self.source.repository(&parent.name).await?;
        let fork = self.ensure_fork(&parent, &request.fork).await?;

        if !is_sha(&request.head_sha) {
            request.head_sha = self
                .source
                .sha_for_ref(&fork.name, &request.head_sha)
                .await?;
        }

        let mut base_sha = self
            .source
            .sha_for_ref(&parent.name, &remote_parent.main_branch())
            .await?;
        if is_zero_sha(&base_sha) {
            if fork.id != parent.id {
                return Err(Error::Validation(
                    "base SHA was blank but this was not a new branch".into(),
                ));
            }
            base_sha = request.head_sha.clone();
        }
        request.base_sha = base_sha;

        let head = self.ensure_ref(&fork, &request.head_sha).await?;
        let base = self.ensure_ref(&parent, &request.base_sha).await?;

        Ok(Resolved {
            parent,
            remote_parent,
            fork,
            head,
            base,
            user_id,
        })
    }

    /// Manual submissions must name a known submitter.
    async fn submitter(&self, request: &SubmissionRequest) -> Result<Option<UserId>> {
        let Some(name) = request.submitted_by.as_deref().filter(|n| !n.is_empty()) else {
            if request.manual {
                return Err(Error::Validation(
                    "manual submission requires a submitter".into(),
                ));
            }
            return Ok(None);
        };

        match self.stores.users.find_by_name(name).await? {
            Some(user) => Ok(Some(user.id)),
            None if request.manual => Err(Error::not_found(format!("user {name}"))),
            None => Ok(None),
        }
    }

    /// Test against the fork itself when it is enabled, otherwise against its
    /// upstream.
    async fn select_parent(&self, fork: &str) -> Result<String> {
        let remote = self.source.repository(fork).await?;
        let enabled = self
            .stores
            .repositories
            .get_by_name(&remote.full_name)
            .await?
            .is_some_and(|r| !r.disabled);

        let parent = match (&remote.parent, enabled, remote.fork) {
            (Some(upstream), false, true) => {
                debug!(fork, parent = %upstream, "Selected upstream of fork");
                upstream.clone()
            }
            _ => {
                debug!(fork, "Selected fork; it is enabled directly");
                remote.full_name.clone()
            }
        };

        owner_repo(&parent)?;
        Ok(parent)
    }

    /// Find the fork's record, registering it on first sight.
    async fn ensure_fork(&self, parent: &Repository, fork: &str) -> Result<Repository> {
        let remote = self.source.repository(fork).await?;
        owner_repo(&remote.full_name)?;

        for attempt in 1..=FORK_ATTEMPTS {
            if let Some(repo) = self
                .stores
                .repositories
                .get_by_name(&remote.full_name)
                .await?
            {
                return Ok(repo);
            }

            match self
                .stores
                .repositories
                .create(&NewRepository::auto_created(&remote, parent.owner_id))
                .await
            {
                Ok(repo) => return Ok(repo),
                Err(e) if e.is_conflict() => {
                    debug!(fork = %remote.full_name, attempt, "Fork registered concurrently; retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "could not register fork {} after {FORK_ATTEMPTS} attempts",
            remote.full_name
        )))
    }

    /// Find or store the ref for a SHA, named after the first ref pointing
    /// at it.
    async fn ensure_ref(&self, repository: &Repository, sha: &str) -> Result<Ref> {
        repository.owner_repo()?;

        if let Some(existing) = self.stores.refs.find(&repository.name, sha).await? {
            return Ok(existing);
        }

        let mut names = self.source.refs_for_sha(&repository.name, sha).await?;
        names.sort();
        let ref_name = names.into_iter().next().unwrap_or_else(|| sha.to_string());

        let new = NewRef {
            repository_id: repository.id,
            ref_name,
            sha: sha.to_string(),
        };
        match self.stores.refs.create(&new).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_conflict() => self
                .stores
                .refs
                .find(&repository.name, sha)
                .await?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Repository configuration from the main branch; absent means defaults.
    async fn repo_config(&self, repository: &str, main_branch: &str) -> Result<RepoConfig> {
        let at = format!("refs/{main_branch}");
        match self
            .source
            .fetch_file(repository, &at, REPO_CONFIG_FILENAME)
            .await
        {
            Ok(buf) => Ok(RepoConfig::parse(&buf)?),
            Err(e) if e.is_not_found() => {
                debug!(repository, "No repository configuration; using defaults");
                Ok(RepoConfig::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel outstanding work for the head ref and clear its statuses.
    /// Failures are logged only.
    async fn clear_previous(&self, resolved: &Resolved) {
        match self
            .stores
            .tasks
            .cancel_ref_by_name(resolved.fork.id, &resolved.head.ref_name)
            .await
        {
            Ok(canceled) if !canceled.is_empty() => {
                info!(
                    repository = %resolved.fork.name,
                    ref_name = %resolved.head.ref_name,
                    tasks = canceled.len(),
                    "Canceled previous runs"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    repository = %resolved.fork.name,
                    ref_name = %resolved.head.ref_name,
                    error = %e,
                    "Failed to cancel previous runs; continuing"
                );
            }
        }

        if let Err(e) = self
            .source
            .clear_statuses(&resolved.parent.name, &resolved.head.sha)
            .await
        {
            warn!(
                repository = %resolved.parent.name,
                sha = %resolved.head.sha,
                error = %e,
                "Failed to clear statuses; continuing"
            );
        }
    }

    fn post_pending(&self, resolved: &Resolved, queued: &[QueueItem]) {
        let Ok((owner, repo)) = resolved.parent.owner_repo() else {
            warn!(repository = %resolved.parent.name, "Invalid repository name; not posting statuses");
            return;
        };

        for item in queued {
            self.notifier.notify(CommitStatus {
                owner: owner.to_string(),
                repo: repo.to_string(),
                context: item.run.name.clone(),
                sha: resolved.head.sha.clone(),
                target_url: self.config.base_url.clone(),
                state: StatusState::Pending,
            });
        }
    }
}
