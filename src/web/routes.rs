use axum::routing::{get, post};
use axum::Router;

use crate::web::{handlers, AppState};

/// Builds the JSON control-surface router. No templated UI — every route
/// returns `application/json` (or `204 No Content` for fire-and-forget
/// actions), matched by the external control clients this daemon serves.
pub fn create_router(app_state: AppState) -> Router<()> {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/queue", get(handlers::queue))
        .route("/sync-now", post(handlers::sync_now))
        .route("/pause-downloads", post(handlers::pause_downloads))
        .route("/resume-downloads", post(handlers::resume_downloads))
        .route("/download-status", get(handlers::download_status))
        .route("/reset-queue", post(handlers::reset_queue))
        .route("/reset-errors", post(handlers::reset_errors))
        .route("/config", get(handlers::get_config).post(handlers::post_config))
        .route("/catalog/{kind}", get(handlers::catalog_by_kind))
        .with_state(app_state)
}
