//! Store implementations for PostgreSQL.

mod git_ref;
mod queue;
mod repository;
mod run;
mod submission;
mod task;
mod user;

pub use git_ref::PgRefStore;
pub use queue::PgQueueStore;
pub use repository::PgRepositoryStore;
pub use run::PgRunStore;
pub use submission::PgSubmissionStore;
pub use task::PgTaskStore;
pub use user::PgUserStore;
