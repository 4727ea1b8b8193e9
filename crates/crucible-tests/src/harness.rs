//! The scheduler wired to a store backend and a scripted source.

use crate::source::MockChangeSource;
use crucible_core::ports::{ChangeSource, Stores};
use crucible_scheduler::{
    NotifierConfig, QueueService, SchedulerConfig, StatusNotifier, SubmissionProcessor,
};
use std::sync::Arc;

pub const BASE_URL: &str = "https://ci.example.test";

pub struct Harness {
    pub stores: Stores,
    pub source: Arc<MockChangeSource>,
    pub notifier: Arc<StatusNotifier>,
    pub processor: SubmissionProcessor,
    pub service: QueueService,
}

impl Harness {
    /// Must be called within a Tokio runtime.
    pub fn new(stores: Stores, source: MockChangeSource) -> Self {
        let source = Arc::new(source);
        let dyn_source: Arc<dyn ChangeSource> = source.clone();
        let config = SchedulerConfig::default().with_base_url(BASE_URL);

        let notifier = Arc::new(StatusNotifier::start(
            dyn_source.clone(),
            NotifierConfig::default().with_workers(2).with_capacity(256),
        ));
        let processor = SubmissionProcessor::new(
            stores.clone(),
            dyn_source,
            notifier.clone(),
            config.clone(),
        );
        let service = QueueService::new(stores.clone(), notifier.clone(), config);

        Self {
            stores,
            source,
            notifier,
            processor,
            service,
        }
    }

    /// Wait for every queued status to be posted.
    pub async fn flush(&self) {
        self.notifier.flush().await;
    }
}
