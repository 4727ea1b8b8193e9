//! Submission pipeline tests against the in-process store.

use crucible_core::ports::StatusState;
use crucible_core::run::QueueItem;
use crucible_core::submission::SubmissionRequest;
use crucible_tests::{
    FEATURE_BRANCH, HEAD_SHA, Harness, MAIN_BRANCH, MAIN_SHA, MockChangeSource, OTHER_SHA,
    TestContext, as_strs, remote, remote_fork, run_names, seed_repository, task_yaml,
    task_yaml_with_deps,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

const REPO: &str = "erikh/foobar";

/// A repository on `master` with a feature branch at [`HEAD_SHA`].
fn source() -> MockChangeSource {
    MockChangeSource::new()
        .with_repository(remote(REPO))
        .with_ref(REPO, MAIN_BRANCH, MAIN_SHA)
        .with_ref(REPO, FEATURE_BRANCH, HEAD_SHA)
}

fn push(head: &str) -> SubmissionRequest {
    SubmissionRequest {
        parent: REPO.to_string(),
        fork: REPO.to_string(),
        head_sha: head.to_string(),
        base_sha: MAIN_SHA.to_string(),
        ..Default::default()
    }
}

async fn harness(source: MockChangeSource) -> Harness {
    let stores = TestContext::memory();
    seed_repository(&stores, REPO).await.unwrap();
    Harness::new(stores, source)
}

/// Task directories of queued runs, taken from the run names.
fn task_paths(items: &[QueueItem]) -> BTreeSet<String> {
    items
        .iter()
        .map(|i| {
            i.run
                .name
                .split_once(':')
                .map(|(dir, _)| dir.to_string())
                .unwrap_or_default()
        })
        .collect()
}

#[tokio::test]
async fn test_push_queues_every_run_of_touched_tasks() {
    let runs = run_names("run", 5);
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&as_strs(&runs)))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", &task_yaml(&as_strs(&runs)))
            .with_file(REPO, HEAD_SHA, "foo/lib.rs", "")
            .with_file(REPO, HEAD_SHA, "README.md", "")
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml", "foo/lib.rs"]),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    assert_eq!(queued.len(), 10);

    let tasks: BTreeSet<_> = queued.iter().map(|i| i.run.task_id).collect();
    assert_eq!(tasks.len(), 2);

    let names: BTreeSet<_> = queued.iter().map(|i| i.run.name.as_str()).collect();
    assert!(names.contains("*root*:run0"));
    assert!(names.contains("foo:run4"));
    assert!(queued.iter().all(|i| i.queue_name == "default" && !i.running));

    h.flush().await;
    let statuses = h.source.statuses();
    assert_eq!(statuses.len(), 10);
    assert!(statuses.iter().all(|s| s.state == StatusState::Pending
        && s.sha == HEAD_SHA
        && s.owner == "erikh"
        && s.repo == "foobar"));
    assert_eq!(h.source.cleared(), vec![(REPO.to_string(), HEAD_SHA.to_string())]);
}

#[tokio::test]
async fn test_dependency_only_task_expands_dependencies() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["root"]))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", &task_yaml_with_deps(&[], &["bar"]))
            .with_file(REPO, HEAD_SHA, "bar/task.yml", &task_yaml(&["one", "two"]))
            .with_file(REPO, HEAD_SHA, "foo/main.go", "")
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["foo/main.go"]),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();

    let names: BTreeSet<_> = queued.iter().map(|i| i.run.name.clone()).collect();
    let expected: BTreeSet<_> = ["*root*:root", "bar:one", "bar:two"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(names, expected);
    assert_eq!(
        task_paths(&queued),
        ["*root*", "bar"].into_iter().map(String::from).collect()
    );
}

#[tokio::test]
async fn test_dependency_chains_and_cycles_queue_each_run_once() {
    // a -> b -> {c, .} and c -> a closes the loop back onto selected tasks.
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, HEAD_SHA, "a/task.yml", &task_yaml_with_deps(&["x"], &["b"]))
            .with_file(REPO, HEAD_SHA, "b/task.yml", &task_yaml_with_deps(&["x"], &["c", "."]))
            .with_file(REPO, HEAD_SHA, "c/task.yml", &task_yaml_with_deps(&["x"], &["a"]))
            .with_file(REPO, HEAD_SHA, "d/task.yml", &task_yaml(&["x"]))
            .with_file(REPO, HEAD_SHA, "a/lib.rs", "")
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["a/lib.rs"]),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();

    let mut names: Vec<_> = queued.iter().map(|i| i.run.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["*root*:r", "a:x", "b:x", "c:x"]);

    let tasks: BTreeSet<_> = queued.iter().map(|i| i.run.task_id).collect();
    assert_eq!(tasks.len(), 4);
}

#[tokio::test]
async fn test_blank_base_diffs_head_against_itself() {
    let zero = "0".repeat(40);
    let h = harness(
        MockChangeSource::new()
            .with_repository(remote(REPO))
            .with_ref(REPO, MAIN_BRANCH, &zero)
            .with_ref(REPO, FEATURE_BRANCH, HEAD_SHA)
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", &task_yaml(&["f"]))
            .with_diff(REPO, HEAD_SHA, HEAD_SHA, &[]),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    assert_eq!(
        task_paths(&queued),
        ["*root*"].into_iter().map(String::from).collect()
    );
}

#[tokio::test]
async fn test_nested_change_selects_owning_task_and_root() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", &task_yaml(&["f"]))
            .with_file(REPO, HEAD_SHA, "bar/task.yml", &task_yaml(&["b"]))
            .with_file(REPO, HEAD_SHA, "foo/bar/baz.rs", "")
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["foo/bar/baz.rs"]),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    assert_eq!(
        task_paths(&queued),
        ["*root*", "foo"].into_iter().map(String::from).collect()
    );
}

#[tokio::test]
async fn test_main_branch_push_tests_everything() {
    // No diff is registered: an exhaustive submission never asks for one.
    let h = harness(
        MockChangeSource::new()
            .with_repository(remote(REPO))
            .with_ref(REPO, MAIN_BRANCH, HEAD_SHA)
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", &task_yaml(&["f"]))
            .with_file(REPO, HEAD_SHA, "bar/task.yml", &task_yaml(&["b"])),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    assert_eq!(queued.len(), 3);
}

#[tokio::test]
async fn test_branch_name_head_is_resolved() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml"]),
    )
    .await;

    let queued = h.processor.submit(push("feature")).await.unwrap();
    assert_eq!(queued.len(), 1);

    let detail = h
        .stores
        .runs
        .detail(queued[0].run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.head_sha, HEAD_SHA);
    assert_eq!(detail.repository, REPO);
}

#[tokio::test]
async fn test_repository_config_applies_queue_and_timeout() {
    let config = "queue: big\nglobal_timeout: 600\n";
    let h = harness(
        source()
            .with_file(REPO, "refs/heads/master", "crucible.yml", config)
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml"]),
    )
    .await;

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    assert_eq!(queued[0].queue_name, "big");
    assert_eq!(queued[0].run.settings.timeout, 600);
}

#[tokio::test]
async fn test_parse_error_comments_on_ticket() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", "mountpoint: /tmp\nbogus: true\n")
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["foo/task.yml"]),
    )
    .await;

    let request = SubmissionRequest {
        ticket_id: Some(12),
        ..push(HEAD_SHA)
    };
    let err = h.processor.submit(request).await.unwrap_err();
    assert!(err.is_validation(), "{err}");

    let comments = h.source.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, REPO);
    assert_eq!(comments[0].1, 12);
    assert!(comments[0].2.contains("foo/task.yml"));

    assert_eq!(h.stores.queue.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_parse_error_survives_comment_failure() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", "runs: [")
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml"]),
    )
    .await;
    h.source.fail_comments(true);

    let request = SubmissionRequest {
        ticket_id: Some(3),
        ..push(HEAD_SHA)
    };
    let err = h.processor.submit(request).await.unwrap_err();
    assert!(err.is_validation(), "{err}");
    assert!(h.source.comments().is_empty());
}

#[tokio::test]
async fn test_best_effort_failures_do_not_abort() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml"]),
    )
    .await;
    h.source.fail_clear_statuses(true);
    h.source.fail_statuses(true);

    let queued = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    assert_eq!(queued.len(), 1);

    h.flush().await;
    let stats = h.notifier.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.sent, 0);
}

#[tokio::test]
async fn test_new_push_cancels_previous_runs_on_branch() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, OTHER_SHA, "task.yml", &task_yaml(&["r"]))
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml"])
            .with_diff(REPO, MAIN_SHA, OTHER_SHA, &["task.yml"]),
    )
    .await;

    let first = h.processor.submit(push(HEAD_SHA)).await.unwrap();
    h.source.move_ref(REPO, FEATURE_BRANCH, OTHER_SHA);
    let second = h.processor.submit(push(OTHER_SHA)).await.unwrap();

    let previous = h.stores.tasks.get(first[0].run.task_id).await.unwrap().unwrap();
    assert!(previous.canceled);
    assert_eq!(previous.status, Some(false));

    let current = h.stores.tasks.get(second[0].run.task_id).await.unwrap().unwrap();
    assert!(!current.canceled);
    assert_eq!(h.stores.queue.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_fork_is_registered_disabled() {
    let fork = "someone/foobar";
    let h = harness(
        source()
            .with_repository(remote_fork(fork, REPO))
            .with_ref(fork, FEATURE_BRANCH, HEAD_SHA)
            .with_file(fork, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_diff(REPO, MAIN_SHA, HEAD_SHA, &["task.yml"]),
    )
    .await;

    let request = SubmissionRequest {
        fork: fork.to_string(),
        ticket_id: Some(1),
        ..push(HEAD_SHA)
    };
    let queued = h.processor.submit(request).await.unwrap();
    assert_eq!(queued.len(), 1);

    let registered = h
        .stores
        .repositories
        .get_by_name(fork)
        .await
        .unwrap()
        .unwrap();
    assert!(registered.disabled);
    assert!(registered.auto_created);

    h.flush().await;
    // Statuses go to the parent even though the change lives in the fork.
    assert!(h.source.statuses().iter().all(|s| s.owner == "erikh"));
}

#[tokio::test]
async fn test_disabled_repository_is_rejected() {
    let h = harness(source()).await;
    let repo = h.stores.repositories.get_by_name(REPO).await.unwrap().unwrap();
    h.stores.repositories.set_disabled(repo.id, true).await.unwrap();

    let err = h.processor.submit(push(HEAD_SHA)).await.unwrap_err();
    assert!(err.is_validation(), "{err}");
}

#[tokio::test]
async fn test_manual_submission_requires_known_submitter() {
    let h = harness(source()).await;

    let anonymous = SubmissionRequest {
        manual: true,
        base_sha: String::new(),
        ..push(HEAD_SHA)
    };
    assert!(h.processor.submit(anonymous).await.unwrap_err().is_validation());

    let stranger = SubmissionRequest {
        manual: true,
        submitted_by: Some("nobody".to_string()),
        base_sha: String::new(),
        ..push(HEAD_SHA)
    };
    assert!(h.processor.submit(stranger).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_manual_all_tests_everything() {
    let h = harness(
        source()
            .with_file(REPO, HEAD_SHA, "task.yml", &task_yaml(&["r"]))
            .with_file(REPO, HEAD_SHA, "foo/task.yml", &task_yaml(&["f"])),
    )
    .await;

    let request = SubmissionRequest {
        parent: String::new(),
        base_sha: String::new(),
        manual: true,
        all: true,
        submitted_by: Some("erikh".to_string()),
        ..push(HEAD_SHA)
    };
    let queued = h.processor.submit(request).await.unwrap();
    assert_eq!(queued.len(), 2);
}

#[tokio::test]
async fn test_hook_may_not_force_all() {
    let h = harness(source()).await;
    let request = SubmissionRequest {
        all: true,
        ..push(HEAD_SHA)
    };
    assert!(h.processor.submit(request).await.unwrap_err().is_validation());
}
