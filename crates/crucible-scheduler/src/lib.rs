//! Submission pipeline and queue orchestration for Crucible CI.
//!
//! A change event flows through [`SubmissionProcessor`]: task discovery,
//! dependency expansion, materialization and a single bulk enqueue. Workers
//! and operators then go through [`QueueService`].

pub mod config;
pub mod discovery;
pub mod materializer;
pub mod notifier;
pub mod processor;
pub mod service;
pub mod watchdog;

pub use config::{NotifierConfig, SchedulerConfig};
pub use discovery::TaskDiscovery;
pub use materializer::Materializer;
pub use notifier::{NotifierStats, StatusNotifier};
pub use processor::SubmissionProcessor;
pub use service::QueueService;
pub use watchdog::StaleClaimWatchdog;
