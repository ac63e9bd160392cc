use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::services::scheduler::SyncReason;
use crate::web::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub missing: u64,
    pub downloading: usize,
    pub downloaded: u64,
    pub songs: u64,
    pub artists: u64,
    pub albums: u64,
    pub recent: Vec<String>,
    pub queue: QueueTotals,
    pub schedule: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QueueTotals {
    pub pending: usize,
    pub current: usize,
    pub completed: usize,
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;

    let counts = match orchestrator.catalog_counts().await {
        Ok(counts) => counts,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };
    let by_status = match orchestrator.catalog_counts_by_status().await {
        Ok(counts) => counts,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };
    let queue = orchestrator.queue_snapshot().await;
    let recent = orchestrator.recent_events().await;
    let schedule = orchestrator.next_run().await;

    let response = StatusResponse {
        missing: by_status.missing,
        downloading: queue.current.len(),
        downloaded: by_status.downloaded,
        songs: counts.songs,
        artists: counts.artists,
        albums: counts.albums,
        recent,
        queue: QueueTotals { pending: queue.pending.len(), current: queue.current.len(), completed: queue.completed.len() },
        schedule,
    };

    Json(response).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub pending: Vec<crate::domain::queue_item::QueueItem>,
    pub current: Vec<crate::domain::queue_item::CurrentItem>,
    pub completed: Vec<crate::domain::queue_item::CompletedItem>,
    pub totals: QueueTotals,
    pub completed_success: usize,
    pub completed_failure: usize,
    pub page: usize,
    pub page_size: usize,
}

fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Vec<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let start = (page - 1) * page_size;
    items.iter().skip(start).take(page_size).cloned().collect()
}

pub async fn queue(State(state): State<AppState>, Query(params): Query<PageParams>) -> impl IntoResponse {
    let doc = state.orchestrator.queue_snapshot().await;

    let completed_success = doc
        .completed
        .iter()
        .filter(|item| matches!(item.outcome, crate::domain::queue_item::CompletionOutcome::Success))
        .count();
    let completed_failure = doc.completed.len() - completed_success;

    let response = QueueResponse {
        pending: paginate(&doc.pending, params.page, params.page_size),
        current: paginate(&doc.current, params.page, params.page_size),
        completed: paginate(&doc.completed, params.page, params.page_size),
        totals: QueueTotals { pending: doc.pending.len(), current: doc.current.len(), completed: doc.completed.len() },
        completed_success,
        completed_failure,
        page: params.page,
        page_size: params.page_size,
    };

    Json(response)
}

#[derive(Debug, Serialize)]
pub struct SyncNowResponse {
    pub started: bool,
}

pub async fn sync_now(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    // The manual trigger does not wait for the cycle to finish — the caller
    // only learns whether it was *accepted* (single-flight lock acquired).
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let started = orchestrator.run_once(SyncReason::Manual).await;
        let _ = tx.send(started);
    });

    let started = rx.await.unwrap_or(false);
    Json(SyncNowResponse { started })
}

pub async fn pause_downloads(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.pause_downloads();
    StatusCode::NO_CONTENT
}

pub async fn resume_downloads(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.resume_downloads();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct DownloadStatusResponse {
    pub worker_running: bool,
    pub paused: bool,
    pub has_current_download: bool,
}

pub async fn download_status(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let current_len = orchestrator.queue_snapshot().await.current.len();

    Json(DownloadStatusResponse {
        worker_running: orchestrator.worker_running.load(std::sync::atomic::Ordering::SeqCst),
        paused: orchestrator.pause.is_paused(),
        has_current_download: current_len > 0,
    })
}

pub async fn reset_queue(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.reset_queue().await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct ResetErrorsResponse {
    pub requeued: u64,
}

pub async fn reset_errors(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.reset_errors().await {
        Ok(requeued) => Json(ResetErrorsResponse { requeued }).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.config_snapshot().await)
}

pub async fn post_config(
    State(state): State<AppState>,
    Json(config): Json<crate::utils::config::Config>,
) -> impl IntoResponse {
    match state.orchestrator.update_config(config).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct SongEntry {
    pub identity: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub status: String,
}

pub async fn catalog_songs(State(state): State<AppState>) -> impl IntoResponse {
    let tracks = match crate::repository::SqliteTracksRepository::new().all(&state.orchestrator.pool).await {
        Ok(tracks) => tracks,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let songs: Vec<SongEntry> = tracks
        .iter()
        .map(|track| SongEntry {
            identity: track.identity().to_string(),
            artist: track.artist().to_string(),
            title: track.title().to_string(),
            album: track.album().map(str::to_string),
            status: track.status().as_str().to_string(),
        })
        .collect();

    Json(songs).into_response()
}

pub async fn catalog_artists(State(state): State<AppState>) -> impl IntoResponse {
    let tracks = match crate::repository::SqliteTracksRepository::new().all(&state.orchestrator.pool).await {
        Ok(tracks) => tracks,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let artists: HashSet<String> = tracks.iter().map(|t| t.artist().to_string()).collect();
    let mut artists: Vec<String> = artists.into_iter().collect();
    artists.sort_unstable();

    Json(artists).into_response()
}

pub async fn catalog_albums(State(state): State<AppState>) -> impl IntoResponse {
    let tracks = match crate::repository::SqliteTracksRepository::new().all(&state.orchestrator.pool).await {
        Ok(tracks) => tracks,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let albums: HashSet<String> = tracks.iter().filter_map(|t| t.album().map(str::to_string)).collect();
    let mut albums: Vec<String> = albums.into_iter().collect();
    albums.sort_unstable();

    Json(albums).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CatalogKindPath {
    pub kind: String,
}

pub async fn catalog_by_kind(State(state): State<AppState>, Path(params): Path<CatalogKindPath>) -> impl IntoResponse {
    match params.kind.as_str() {
        "songs" => catalog_songs(State(state)).await.into_response(),
        "artists" => catalog_artists(State(state)).await.into_response(),
        "albums" => catalog_albums(State(state)).await.into_response(),
        other => (StatusCode::NOT_FOUND, format!("unknown catalog projection '{other}'")).into_response(),
    }
}
