//! A scripted source-control host.
//!
//! Trees, diffs and refs are registered up front; statuses, comments and
//! cleared SHAs are recorded for assertions. Individual side effects can be
//! made to fail.

use async_trait::async_trait;
use crucible_core::ports::{ChangeSource, CommitStatus};
use crucible_core::repository::RemoteRepository;
use crucible_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct State {
    repositories: HashMap<String, RemoteRepository>,
    /// (repository, sha or ref) -> path -> content
    trees: HashMap<(String, String), Tree>,
    /// (repository, base, head) -> changed paths
    diffs: HashMap<(String, String, String), Vec<String>>,
    /// (repository, ref) -> sha
    refs: BTreeMap<(String, String), String>,

    statuses: Vec<CommitStatus>,
    comments: Vec<(String, i64, String)>,
    cleared: Vec<(String, String)>,

    fail_statuses: bool,
    fail_comments: bool,
    fail_clear: bool,
}

#[derive(Default)]
pub struct MockChangeSource {
    state: Mutex<State>,
}

impl MockChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_repository(mut self, remote: RemoteRepository) -> Self {
        self.state_mut()
            .repositories
            .insert(remote.full_name.clone(), remote);
        self
    }

    pub fn with_ref(mut self, repository: &str, ref_name: &str, sha: &str) -> Self {
        self.state_mut().refs.insert(
            (repository.to_string(), ref_name.to_string()),
            sha.to_string(),
        );
        self
    }

    /// Add a file to the tree at `at`, a SHA or a `refs/...` name.
    pub fn with_file(mut self, repository: &str, at: &str, path: &str, content: &str) -> Self {
        self.state_mut()
            .trees
            .entry((repository.to_string(), at.to_string()))
            .or_default()
            .insert(path.to_string(), content.as_bytes().to_vec());
        self
    }

    pub fn with_diff(mut self, repository: &str, base: &str, head: &str, files: &[&str]) -> Self {
        self.state_mut().diffs.insert(
            (repository.to_string(), base.to_string(), head.to_string()),
            files.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Point a ref at a new SHA, as a push would.
    pub fn move_ref(&self, repository: &str, ref_name: &str, sha: &str) {
        self.state().refs.insert(
            (repository.to_string(), ref_name.to_string()),
            sha.to_string(),
        );
    }

    pub fn fail_statuses(&self, fail: bool) {
        self.state().fail_statuses = fail;
    }

    pub fn fail_comments(&self, fail: bool) {
        self.state().fail_comments = fail;
    }

    pub fn fail_clear_statuses(&self, fail: bool) {
        self.state().fail_clear = fail;
    }

    pub fn statuses(&self) -> Vec<CommitStatus> {
        self.state().statuses.clone()
    }

    /// Posted comments as (repository, ticket, text).
    pub fn comments(&self) -> Vec<(String, i64, String)> {
        self.state().comments.clone()
    }

    /// Cleared statuses as (repository, sha).
    pub fn cleared(&self) -> Vec<(String, String)> {
        self.state().cleared.clone()
    }
}

fn upstream_failure(what: &str) -> Error {
    Error::Upstream(format!("{what} failed"))
}

#[async_trait]
impl ChangeSource for MockChangeSource {
    async fn repository(&self, name: &str) -> Result<RemoteRepository> {
        self.state()
            .repositories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("repository {name}")))
    }

    async fn diff_files(&self, repository: &str, base: &str, head: &str) -> Result<Vec<String>> {
        let key = (repository.to_string(), base.to_string(), head.to_string());
        self.state()
            .diffs
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("diff {base}...{head} in {repository}")))
    }

    async fn all_files(&self, repository: &str, sha: &str) -> Result<Vec<String>> {
        let key = (repository.to_string(), sha.to_string());
        self.state()
            .trees
            .get(&key)
            .map(|tree| tree.keys().cloned().collect())
            .ok_or_else(|| Error::not_found(format!("tree {sha} in {repository}")))
    }

    async fn fetch_file(&self, repository: &str, sha: &str, path: &str) -> Result<Vec<u8>> {
        let key = (repository.to_string(), sha.to_string());
        self.state()
            .trees
            .get(&key)
            .and_then(|tree| tree.get(path))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{path} at {sha} in {repository}")))
    }

    async fn refs_for_sha(&self, repository: &str, sha: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .refs
            .iter()
            .filter(|((repo, _), target)| repo == repository && target.as_str() == sha)
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    async fn sha_for_ref(&self, repository: &str, ref_name: &str) -> Result<String> {
        let key = (repository.to_string(), ref_name.to_string());
        self.state()
            .refs
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("ref {ref_name} in {repository}")))
    }

    async fn post_status(&self, status: &CommitStatus) -> Result<()> {
        let mut state = self.state();
        if state.fail_statuses {
            return Err(upstream_failure("posting status"));
        }
        state.statuses.push(status.clone());
        Ok(())
    }

    async fn post_comment(&self, repository: &str, ticket_id: i64, text: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_comments {
            return Err(upstream_failure("posting comment"));
        }
        state
            .comments
            .push((repository.to_string(), ticket_id, text.to_string()));
        Ok(())
    }

    async fn clear_statuses(&self, repository: &str, sha: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_clear {
            return Err(upstream_failure("clearing statuses"));
        }
        state
            .cleared
            .push((repository.to_string(), sha.to_string()));
        Ok(())
    }
}
