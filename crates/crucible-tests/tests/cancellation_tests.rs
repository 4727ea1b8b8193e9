//! Completion and cancellation tests, including the statuses they report.

use crucible_core::ids::TaskId;
use crucible_core::ports::StatusState;
use crucible_tests::harness::BASE_URL;
use crucible_tests::{
    FEATURE_BRANCH, Harness, MockChangeSource, TestContext, scenarios, seed_submission, seed_task,
};
use pretty_assertions::assert_eq;

const REPO: &str = "acme/widgets";

#[tokio::test]
async fn test_run_status_rollup() {
    let stores = TestContext::memory();
    scenarios::run_status_rollup(&stores, REPO).await.unwrap();
}

#[tokio::test]
async fn test_cancel_task_forces_runs() {
    let stores = TestContext::memory();
    scenarios::cancel_task_forces_runs(&stores, REPO).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_while_dequeuing() {
    let stores = TestContext::memory();
    scenarios::cancel_while_dequeuing(&stores, REPO, 6, 40, 20)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_ref_skips_main_branch() {
    let stores = TestContext::memory();
    scenarios::cancel_ref_skips_main_branch(&stores, REPO)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_submission_skips_finished() {
    let stores = TestContext::memory();
    scenarios::cancel_submission_skips_finished(&stores, REPO)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_unknown_task_is_not_found() {
    let stores = TestContext::memory();
    let err = stores.tasks.cancel(TaskId::new(999)).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[tokio::test]
async fn test_queue_service_reports_lifecycle() {
    let h = Harness::new(TestContext::memory(), MockChangeSource::new());
    let seeded = seed_submission(&h.stores, REPO, FEATURE_BRANCH)
        .await
        .unwrap();
    seed_task(&h.stores, seeded.submission_id, "svc", &["a"], "default")
        .await
        .unwrap();

    let item = h
        .service
        .dequeue_next("default", "worker-a")
        .await
        .unwrap()
        .unwrap();
    h.flush().await;
    h.service.set_run_status(item.run.id, true).await.unwrap();
    h.flush().await;

    let statuses = h.source.statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].state, StatusState::Started);
    assert_eq!(
        statuses[1].state,
        StatusState::Finished {
            success: true,
            message: "The run completed!".to_string()
        }
    );
    for status in &statuses {
        assert_eq!(status.context, "svc:a");
        assert_eq!(status.owner, "acme");
        assert_eq!(status.repo, "widgets");
        assert_eq!(status.sha, seeded.head.sha);
        assert_eq!(
            status.target_url,
            format!("{BASE_URL}/log/{}", item.run.id.get())
        );
    }

    // The second completion conflicts and posts nothing.
    assert!(
        h.service
            .set_run_status(item.run.id, false)
            .await
            .unwrap_err()
            .is_conflict()
    );
    h.flush().await;
    assert_eq!(h.source.statuses().len(), 2);
}

#[tokio::test]
async fn test_cancel_reports_only_forced_runs() {
    let h = Harness::new(TestContext::memory(), MockChangeSource::new());
    let seeded = seed_submission(&h.stores, REPO, FEATURE_BRANCH)
        .await
        .unwrap();
    let (_, items) = seed_task(&h.stores, seeded.submission_id, ".", &["a", "b"], "default")
        .await
        .unwrap();

    h.stores.runs.set_status(items[0].run.id, true).await.unwrap();
    let canceled = h.service.cancel_submission(seeded.submission_id).await.unwrap();
    assert_eq!(canceled.len(), 1);
    h.flush().await;

    let statuses = h.source.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].context, "*root*:b");
    assert_eq!(
        statuses[0].state,
        StatusState::Error {
            message: "The run was canceled".to_string()
        }
    );
}

#[tokio::test]
async fn test_cancel_run_cancels_its_task() {
    let h = Harness::new(TestContext::memory(), MockChangeSource::new());
    let seeded = seed_submission(&h.stores, REPO, FEATURE_BRANCH)
        .await
        .unwrap();
    let (task, items) = seed_task(&h.stores, seeded.submission_id, "t", &["a", "b"], "default")
        .await
        .unwrap();

    let forced = h.service.cancel_run(items[0].run.id).await.unwrap();
    assert_eq!(forced.len(), 2);

    let task = h.stores.tasks.get(task.id).await.unwrap().unwrap();
    assert!(task.canceled);
    h.flush().await;
    assert_eq!(h.source.statuses().len(), 2);
}

#[tokio::test]
async fn test_cancel_ticket() {
    let h = Harness::new(TestContext::memory(), MockChangeSource::new());
    let seeded = seed_submission(&h.stores, REPO, FEATURE_BRANCH)
        .await
        .unwrap();

    // Tickets are recorded on submissions; seed one carrying ticket 42.
    let submission = h
        .stores
        .submissions
        .create(&crucible_core::submission::NewSubmission {
            base_ref_id: seeded.base.id,
            head_ref_id: Some(seeded.head.id),
            user_id: None,
            ticket_id: Some(42),
        })
        .await
        .unwrap();
    let (ticketed, _) = seed_task(&h.stores, submission.id, "pr", &["a"], "default")
        .await
        .unwrap();
    let (other, _) = seed_task(&h.stores, seeded.submission_id, "push", &["a"], "default")
        .await
        .unwrap();

    let canceled = h.service.cancel_ticket(REPO, 42).await.unwrap();
    assert_eq!(canceled, vec![ticketed.id]);

    let other = h.stores.tasks.get(other.id).await.unwrap().unwrap();
    assert!(!other.canceled);
}
