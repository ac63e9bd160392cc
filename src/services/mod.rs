pub mod backoff;
pub mod collaborators;
pub mod events;
pub mod matcher;
pub mod orchestrator;
pub mod path_template;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod sync_lock;
pub mod watchdog;
pub mod worker;

use crate::repository::RepositoryError;

/// Top-level composition of every module's own `thiserror` enum, used by
/// `main.rs`'s startup path alongside `anyhow` for the database bootstrap that
/// runs before the pool exists.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Config(#[from] crate::utils::config::ConfigError),

    #[error(transparent)]
    Sync(#[from] sync::SyncError),

    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error(transparent)]
    PathTemplate(#[from] path_template::PathTemplateError),

    #[error(transparent)]
    Watchdog(#[from] watchdog::WatchdogError),
}
