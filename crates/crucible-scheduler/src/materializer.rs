//! Dependency expansion and task materialization.

use crucible_core::descriptor::{RepoConfig, TASK_FILENAME, TaskSettings};
use crucible_core::ids::SubmissionId;
use crucible_core::naming::run_name;
use crucible_core::ports::{ChangeSource, TaskStore};
use crucible_core::run::{NewQueueItem, NewRun};
use crucible_core::task::NewTask;
use crucible_core::{Error, Result};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// Where task descriptors are read from and where problems are reported.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSource<'a> {
    /// Repository whose tree holds the descriptors.
    pub repository: &'a str,
    pub sha: &'a str,
    /// Repository the ticket belongs to.
    pub parent: &'a str,
    pub ticket_id: Option<i64>,
    pub config: &'a RepoConfig,
}

pub struct Materializer {
    source: Arc<dyn ChangeSource>,
    tasks: Arc<dyn TaskStore>,
}

impl Materializer {
    pub fn new(source: Arc<dyn ChangeSource>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { source, tasks }
    }

    /// Close the selected directories over their declared dependencies.
    ///
    /// Directories are processed first-in first-out; every directory is parsed
    /// once. A descriptor that cannot be read or parsed fails the whole
    /// expansion.
    pub async fn expand<'d>(
        &self,
        from: &DescriptorSource<'_>,
        dirs: impl IntoIterator<Item = &'d String>,
    ) -> Result<BTreeMap<String, TaskSettings>> {
        let mut worklist: VecDeque<String> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        for dir in dirs {
            let dir = normalize_dir(dir);
            if seen.insert(dir.clone()) {
                worklist.push_back(dir);
            }
        }

        let mut expanded = BTreeMap::new();
        while let Some(dir) = worklist.pop_front() {
            let settings = self.load(from, &dir).await?;

            for dep in &settings.dependencies {
                let dep = normalize_dir(dep);
                if seen.insert(dep.clone()) {
                    tracing::debug!(dir = %dir, dependency = %dep, "Adding dependency");
                    worklist.push_back(dep);
                }
            }

            expanded.insert(dir, settings);
        }

        Ok(expanded)
    }

    /// Store a task per directory that owns runs and build its queue items.
    ///
    /// Dependency-only directories are skipped. A storage failure stops the
    /// sweep; tasks stored before it stay stored.
    pub async fn materialize(
        &self,
        submission_id: SubmissionId,
        expanded: BTreeMap<String, TaskSettings>,
    ) -> Result<Vec<NewQueueItem>> {
        let mut items = Vec::new();

        for (dir, settings) in expanded {
            let new = NewTask {
                submission_id,
                path: dir,
                settings,
            };
            if let Err(e) = new.validate() {
                tracing::debug!(dir = %new.path, reason = %e, "Skipping task without runs");
                continue;
            }

            let task = self.tasks.create(&new).await?;
            tracing::debug!(
                task_id = %task.id,
                dir = %task.path,
                runs = task.settings.runs.len(),
                "Task created"
            );

            for (name, run) in &task.settings.runs {
                items.push(NewQueueItem::for_run(NewRun {
                    task_id: task.id,
                    name: run_name(&task.path, name),
                    settings: run.clone(),
                }));
            }
        }

        Ok(items)
    }

    async fn load(&self, from: &DescriptorSource<'_>, dir: &str) -> Result<TaskSettings> {
        let path = descriptor_path(dir);
        let buf = self
            .source
            .fetch_file(from.repository, from.sha, &path)
            .await?;

        match TaskSettings::parse(&buf, false, from.config) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                let err = Error::Validation(format!("{path}: {e}"));
                if let Some(ticket_id) = from.ticket_id {
                    let text = format!("There was an error processing your pull request: {err}");
                    if let Err(ce) = self.source.post_comment(from.parent, ticket_id, &text).await {
                        tracing::warn!(
                            repository = from.parent,
                            ticket_id,
                            error = %ce,
                            "Failed to report descriptor error"
                        );
                    }
                }
                Err(err)
            }
        }
    }
}

/// Path of a directory's task descriptor.
pub fn descriptor_path(dir: &str) -> String {
    if dir == "." || dir.is_empty() {
        TASK_FILENAME.to_string()
    } else {
        format!("{dir}/{TASK_FILENAME}")
    }
}

/// `./foo/` and `foo` name the same directory; the root is `.`.
fn normalize_dir(dir: &str) -> String {
    let dir = dir.trim().trim_end_matches('/');
    let dir = dir.strip_prefix("./").unwrap_or(dir);
    if dir.is_empty() {
        ".".to_string()
    } else {
        dir.to_string()
    }
}
