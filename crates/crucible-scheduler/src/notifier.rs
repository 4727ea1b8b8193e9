//! Commit status notifier pool.
//!
//! Status updates are handed to a bounded channel drained by a fixed set of
//! worker tasks. Callers never wait on the source host: a full channel drops
//! the update with a warning. Every outcome is counted.

use crate::config::NotifierConfig;
use crucible_core::ports::{ChangeSource, CommitStatus};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Shared {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct StatusNotifier {
    tx: StdMutex<Option<mpsc::Sender<CommitStatus>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl StatusNotifier {
    /// Start the worker tasks. Must be called within a Tokio runtime.
    pub fn start(source: Arc<dyn ChangeSource>, config: NotifierConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(Self::work(
                    worker,
                    source.clone(),
                    rx.clone(),
                    shared.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            capacity = config.capacity.max(1),
            "Status notifier started"
        );

        Self {
            tx: StdMutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shared,
        }
    }

    /// Queue a status update without waiting.
    pub fn notify(&self, status: CommitStatus) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        let result = match self.tx.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(tx) => tx.try_send(status),
                None => Err(TrySendError::Closed(status)),
            },
            Err(_) => Err(TrySendError::Closed(status)),
        };

        if let Err(e) = result {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, status) = match e {
                TrySendError::Full(s) => ("queue full", s),
                TrySendError::Closed(s) => ("notifier stopped", s),
            };
            warn!(
                context = %status.context,
                sha = %status.sha,
                reason,
                "Dropped commit status"
            );
            self.shared.done();
        }
    }

    /// Wait until every queued update has been attempted.
    pub async fn flush(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting updates, drain the queue and join the workers.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Status notifier worker panicked");
            }
        }
        info!(stats = ?self.stats(), "Status notifier stopped");
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            sent: self.shared.sent.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    async fn work(
        worker: usize,
        source: Arc<dyn ChangeSource>,
        rx: Arc<Mutex<mpsc::Receiver<CommitStatus>>>,
        shared: Arc<Shared>,
    ) {
        loop {
            let next = rx.lock().await.recv().await;
            let Some(status) = next else {
                debug!(worker, "Status notifier worker exiting");
                break;
            };

            match source.post_status(&status).await {
                Ok(()) => {
                    shared.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(worker, context = %status.context, sha = %status.sha, "Posted commit status");
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker,
                        owner = %status.owner,
                        repo = %status.repo,
                        context = %status.context,
                        sha = %status.sha,
                        error = %e,
                        "Failed to post commit status"
                    );
                }
            }
            shared.done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crucible_core::ports::StatusState;
    use crucible_core::repository::RemoteRepository;
    use crucible_core::{Error, Result};
    use pretty_assertions::assert_eq;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Recorder {
        posted: StdMutex<Vec<CommitStatus>>,
        fail: bool,
        gate: Option<Arc<Semaphore>>,
    }

    fn unused() -> Error {
        Error::Internal("not scripted".into())
    }

    #[async_trait]
    impl ChangeSource for Recorder {
        async fn repository(&self, _name: &str) -> Result<RemoteRepository> {
            Err(unused())
        }
        async fn diff_files(&self, _: &str, _: &str, _: &str) -> Result<Vec<String>> {
            Err(unused())
        }
        async fn all_files(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Err(unused())
        }
        async fn fetch_file(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
            Err(unused())
        }
        async fn refs_for_sha(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Err(unused())
        }
        async fn sha_for_ref(&self, _: &str, _: &str) -> Result<String> {
            Err(unused())
        }
        async fn post_status(&self, status: &CommitStatus) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail {
                return Err(Error::Upstream("status rejected".into()));
            }
            self.posted.lock().unwrap().push(status.clone());
            Ok(())
        }
        async fn post_comment(&self, _: &str, _: i64, _: &str) -> Result<()> {
            Err(unused())
        }
        async fn clear_statuses(&self, _: &str, _: &str) -> Result<()> {
            Err(unused())
        }
    }

    fn status(context: &str) -> CommitStatus {
        CommitStatus {
            owner: "erikh".into(),
            repo: "foobar".into(),
            context: context.into(),
            sha: "a".repeat(40),
            target_url: "http://localhost".into(),
            state: StatusState::Pending,
        }
    }

    #[tokio::test]
    async fn test_posts_and_counts() {
        let source = Arc::new(Recorder::default());
        let notifier = StatusNotifier::start(source.clone(), NotifierConfig::default());

        for i in 0..3 {
            notifier.notify(status(&format!("*root*:{i}")));
        }
        notifier.flush().await;

        assert_eq!(source.posted.lock().unwrap().len(), 3);
        assert_eq!(
            notifier.stats(),
            NotifierStats {
                sent: 3,
                failed: 0,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let source = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let notifier = StatusNotifier::start(source, NotifierConfig::default().with_workers(1));

        notifier.notify(status("a"));
        notifier.notify(status("b"));
        notifier.flush().await;

        assert_eq!(notifier.stats().failed, 2);
        assert_eq!(notifier.stats().sent, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(Recorder {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let config = NotifierConfig::default().with_workers(1).with_capacity(1);
        let notifier = StatusNotifier::start(source.clone(), config);

        // The current-thread runtime has not run the worker yet, so the
        // second and third updates find the channel full.
        notifier.notify(status("a"));
        notifier.notify(status("b"));
        notifier.notify(status("c"));
        assert_eq!(notifier.stats().dropped, 2);

        let mut flush = tokio_test::task::spawn(notifier.flush());
        tokio_test::assert_pending!(flush.poll());
        drop(flush);

        gate.add_permits(8);
        notifier.flush().await;
        assert_eq!(notifier.stats().sent, 1);
        assert_eq!(source.posted.lock().unwrap()[0].context, "a");
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let source = Arc::new(Recorder::default());
        let notifier = StatusNotifier::start(source.clone(), NotifierConfig::default());

        notifier.notify(status("a"));
        notifier.notify(status("b"));
        notifier.shutdown().await;
        assert_eq!(notifier.stats().sent, 2);

        notifier.notify(status("late"));
        assert_eq!(notifier.stats().dropped, 1);
        notifier.flush().await;
    }
}
