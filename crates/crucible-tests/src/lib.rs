//! Integration test infrastructure for Crucible CI.
//!
//! Provides a scripted [`MockChangeSource`], data fixtures and store-level
//! scenarios that run against both the in-process store and a PostgreSQL
//! container.
//!
//! # Usage
//!
//! ```ignore
//! use crucible_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::postgres().await.unwrap();
//!     crucible_tests::scenarios::queue_fifo(&ctx.stores(), "acme/widgets").await.unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod harness;
pub mod scenarios;
pub mod source;

pub use context::TestContext;
pub use fixtures::*;
pub use harness::Harness;
pub use source::MockChangeSource;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,crucible_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
