//! Task discovery: decide which task directories a change puts in scope.

use crucible_core::Result;
use crucible_core::descriptor::{RepoConfig, TASK_FILENAME};
use crucible_core::naming::{base_name, parent_dir};
use crucible_core::ports::ChangeSource;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Directory representing repository-wide tasks; always selected.
pub const ROOT_DIR: &str = ".";

/// What to compare when discovering tasks.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryRequest<'a> {
    /// Repository the change is tested against; diffs are taken here.
    pub parent: &'a str,
    /// Repository carrying the change; its tree is listed.
    pub fork: &'a str,
    pub base_sha: &'a str,
    pub head_sha: &'a str,
    /// Select every task directory regardless of the diff.
    pub exhaustive: bool,
}

pub struct TaskDiscovery {
    source: Arc<dyn ChangeSource>,
}

impl TaskDiscovery {
    pub fn new(source: Arc<dyn ChangeSource>) -> Self {
        Self { source }
    }

    /// Selected task directories. Any failure reading the tree or the diff
    /// aborts discovery.
    pub async fn discover(
        &self,
        request: &DiscoveryRequest<'_>,
        config: &RepoConfig,
    ) -> Result<BTreeSet<String>> {
        let files = self
            .source
            .all_files(request.fork, request.head_sha)
            .await?;
        let task_dirs = task_dirs(&files, config);

        if request.exhaustive {
            tracing::debug!(count = task_dirs.len(), "Selecting every task directory");
            return Ok(task_dirs.into_iter().collect());
        }

        // The base is already resolved; a new branch diffs against itself.
        let changed = self
            .source
            .diff_files(request.parent, request.base_sha, request.head_sha)
            .await?;

        let selected = select(&touched_dirs(&changed), &task_dirs);
        tracing::debug!(
            task_dirs = task_dirs.len(),
            selected = selected.len(),
            "Selected task directories"
        );
        Ok(selected)
    }
}

/// Sorted, de-duplicated directories holding a task descriptor, minus ignored
/// paths.
pub fn task_dirs(files: &[String], config: &RepoConfig) -> Vec<String> {
    let dirs: BTreeSet<&str> = files
        .iter()
        .filter(|f| base_name(f) == TASK_FILENAME)
        .filter(|f| !config.is_ignored(f))
        .map(|f| parent_dir(f))
        .collect();
    dirs.into_iter().map(str::to_string).collect()
}

/// Directories holding at least one changed file.
pub fn touched_dirs(files: &[String]) -> BTreeSet<String> {
    files.iter().map(|f| parent_dir(f).to_string()).collect()
}

/// Attribute touched directories to task directories.
///
/// `task_dirs` must be sorted. An exact match wins; otherwise a touched
/// directory goes to the deepest task directory containing it. The root is
/// always selected.
pub fn select(touched: &BTreeSet<String>, task_dirs: &[String]) -> BTreeSet<String> {
    let mut selected = BTreeSet::new();

    for dir in touched {
        if task_dirs.binary_search(dir).is_ok() {
            selected.insert(dir.clone());
            continue;
        }

        // Reverse lexical order visits deeper ancestors first.
        if let Some(owner) = task_dirs.iter().rev().find(|td| contains(td, dir)) {
            selected.insert(owner.clone());
        }
    }

    selected.insert(ROOT_DIR.to_string());
    selected
}

/// Whether `dir` lies strictly beneath `task_dir`.
fn contains(task_dir: &str, dir: &str) -> bool {
    dir.strip_prefix(task_dir)
        .is_some_and(|rest| rest.starts_with('/'))
}
