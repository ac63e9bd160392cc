use std::sync::Arc;

use crate::repository::RepositoryError;
use crate::services::orchestrator::Orchestrator;

pub mod handlers;
pub mod routes;

#[derive(Debug, thiserror::Error)]
pub enum WebLayerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] crate::utils::config::ConfigError),
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}
