use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::repository::{RepositoryError, SqliteKvRepository, SqliteTracksRepository};
use crate::domain::track::{NewTrack, Track};
use crate::domain::ExpandedFrom;
use crate::utils::config::PlaylistFlags;

use super::collaborators::{CatalogCacheRefresher, PlaylistProvider, PlaylistProviderError};
use super::queue::{Queue, QueueDocument};
use super::matcher::identity_key;

/// Artist/album expansion is capped at this many distinct ids per sync cycle,
/// independent of how many `selected_playlists` entries request it.
const MAX_EXPANSIONS_PER_KIND: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub deduplicated: usize,
    pub skipped_playlists: Vec<String>,
    pub upgraded_to_downloaded: u64,
    pub downgraded_to_missing: u64,
    pub pending_selected: usize,
    pub auth_dead: bool,
}

/// Fetches and expands the playlist catalog. Returns an empty result and
/// `auth_dead = true` the moment any call reports revoked/expired auth — the
/// caller must not touch the catalog in that case.
async fn fetch_and_expand(
    provider: &dyn PlaylistProvider,
    selected_playlists: &HashMap<String, PlaylistFlags>,
) -> (Vec<Track>, Vec<String>, bool) {
    let mut fetched = Vec::new();
    let mut skipped = Vec::new();
    let mut artist_budget = MAX_EXPANSIONS_PER_KIND;
    let mut album_budget = MAX_EXPANSIONS_PER_KIND;

    for (id, flags) in selected_playlists {
        if flags.song {
            match provider.fetch_playlist_tracks(id).await {
                Ok(tracks) => fetched.extend(tracks),
                Err(PlaylistProviderError::AuthDead(reason)) => {
                    log::warn!("sync aborted: authentication is no longer valid: {reason}");
                    return (Vec::new(), Vec::new(), true);
                }
                Err(PlaylistProviderError::PartialAccess { playlist_id, reason }) => {
                    log::warn!("skipping playlist '{playlist_id}': {reason}");
                    skipped.push(playlist_id);
                }
                Err(PlaylistProviderError::RateLimited { retry_after_secs }) => {
                    log::warn!("playlist provider rate-limited us, honouring {retry_after_secs}s backoff");
                    tokio::time::sleep(std::time::Duration::from_secs(retry_after_secs)).await;
                }
                Err(PlaylistProviderError::Other(reason)) => {
                    log::warn!("playlist '{id}' fetch failed: {reason}");
                    skipped.push(id.clone());
                }
            }
        }

        if flags.artist && artist_budget > 0 {
            artist_budget -= 1;
            match provider.expand_artist(id).await {
                Ok(tracks) => fetched.extend(tracks),
                Err(PlaylistProviderError::AuthDead(reason)) => {
                    log::warn!("sync aborted: authentication is no longer valid: {reason}");
                    return (Vec::new(), Vec::new(), true);
                }
                Err(err) => log::warn!("artist expansion for '{id}' failed: {err}"),
            }
        }

        if flags.album && album_budget > 0 {
            album_budget -= 1;
            match provider.expand_album(id).await {
                Ok(tracks) => fetched.extend(tracks),
                Err(PlaylistProviderError::AuthDead(reason)) => {
                    log::warn!("sync aborted: authentication is no longer valid: {reason}");
                    return (Vec::new(), Vec::new(), true);
                }
                Err(err) => log::warn!("album expansion for '{id}' failed: {err}"),
            }
        }
    }

    (fetched, skipped, false)
}

/// Deduplicates raw provider tracks by identity, keeping the first occurrence's
/// provenance, and stamps `last_seen = now`.
fn deduplicate(raw: Vec<Track>, now: i64) -> Vec<Track> {
    let mut by_identity: HashMap<String, Track> = HashMap::new();

    for track in raw {
        let identity = identity_key(track.artist(), track.title(), track.duration());

        by_identity.entry(identity.clone()).or_insert_with(|| {
            Track::new(NewTrack {
                identity,
                artist: track.artist().to_string(),
                title: track.title().to_string(),
                album: track.album().map(str::to_string),
                duration: track.duration(),
                playlist_id: track.playlist_id().map(str::to_string),
                spotify_id: track.spotify_id().map(str::to_string),
                expanded_from: track.expanded_from(),
                last_seen: now,
            })
            .expect("provider tracks are pre-validated upstream")
        });
    }

    by_identity.into_values().collect()
}

/// The body of `run_once`: fetch, expand, dedupe, upsert, then reconcile against
/// disk and rebuild the pending queue. Ordering matters — `upsert_tracks`
/// happens-before `reconcile_against_disk`, which happens-before `select_for_queue`.
#[allow(clippy::too_many_arguments)]
pub async fn run_sync_cycle(
    pool: &SqlitePool,
    provider: &dyn PlaylistProvider,
    selected_playlists: &HashMap<String, PlaylistFlags>,
    queue: &Queue,
    host_path: &Path,
    path_template: &str,
    cache_refresher: Option<&Arc<dyn CatalogCacheRefresher>>,
) -> Result<SyncReport, SyncError> {
    let now = Utc::now().timestamp();
    let (fetched, skipped_playlists, auth_dead) = fetch_and_expand(provider, selected_playlists).await;

    if auth_dead {
        return Ok(SyncReport { auth_dead: true, ..Default::default() });
    }

    let fetched_count = fetched.len();
    let deduplicated = deduplicate(fetched, now);
    let deduplicated_count = deduplicated.len();

    let tracks_repo = SqliteTracksRepository::new();
    tracks_repo.upsert_tracks(pool, &deduplicated).await?;

    let report = reconcile_catalog(pool, queue, host_path, path_template, cache_refresher).await?;

    Ok(SyncReport {
        fetched: fetched_count,
        deduplicated: deduplicated_count,
        skipped_playlists,
        upgraded_to_downloaded: report.upgraded_to_downloaded,
        downgraded_to_missing: report.downgraded_to_missing,
        pending_selected: report.pending_selected,
        auth_dead: false,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub upgraded_to_downloaded: u64,
    pub downgraded_to_missing: u64,
    pub pending_selected: usize,
}

/// `reconcileCatalog(force=true)`: reconciles disk state, rebuilds the live
/// pending queue from `selectForQueue`, snapshots it, and notifies the catalog
/// cache refresher if one is wired. Safe to call standalone (e.g. after a
/// watchdog-triggered change, or after a worker cycle) without running a full sync.
pub async fn reconcile_catalog(
    pool: &SqlitePool,
    queue: &Queue,
    host_path: &Path,
    path_template: &str,
    cache_refresher: Option<&Arc<dyn CatalogCacheRefresher>>,
) -> Result<ReconcileReport, SyncError> {
    let now = Utc::now().timestamp();
    let tracks_repo = SqliteTracksRepository::new();

    let disk_paths = super::path_template::scan_music_root(host_path);
    let disk_identity_index = super::path_template::index_disk_by_identity(host_path, path_template);
    let disk_outcome = tracks_repo.reconcile_against_disk(pool, &disk_paths, &disk_identity_index, now).await?;
    let selected = tracks_repo.select_for_queue(pool, now).await?;

    // A row the worker is mid-download on is still `pending`/`missing` in the
    // catalog until `mark_success`/`mark_failure` lands at the end of its
    // cycle, so `select_for_queue` can return it while it sits in
    // `queue.current`. Excluding those identities here keeps pending/current
    // disjoint even when reconciliation runs concurrently with a download
    // (a watchdog trigger, a concurrent sync, or the post-download reconcile
    // with `concurrency > 1`).
    let in_flight = queue.current_identities().await;
    let pending_items: Vec<_> = selected
        .iter()
        .filter(|track| !in_flight.contains(track.identity()))
        .map(|track| crate::domain::queue_item::QueueItem {
            identity: track.identity().to_string(),
            artist: track.artist().to_string(),
            title: track.title().to_string(),
            album: track.album().map(str::to_string),
            queued_at: track.last_seen(),
        })
        .collect();
    let pending_selected = pending_items.len();
    queue.set_pending(pending_items).await;

    let snapshot = queue.snapshot().await;
    save_snapshot(pool, &snapshot).await?;

    if let Some(refresher) = cache_refresher {
        let all_tracks = tracks_repo.all(pool).await?;
        refresher.refresh(&all_tracks).await;
    }

    Ok(ReconcileReport {
        upgraded_to_downloaded: disk_outcome.upgraded_to_downloaded,
        downgraded_to_missing: disk_outcome.downgraded_to_missing,
        pending_selected,
    })
}

const SNAPSHOT_KEY: &str = "status_snapshot";

pub async fn save_snapshot(pool: &SqlitePool, doc: &QueueDocument) -> Result<(), SyncError> {
    let serialized = serde_json::to_string(doc).unwrap_or_else(|_| "{}".to_string());
    SqliteKvRepository::new().set(pool, SNAPSHOT_KEY, &serialized).await?;
    Ok(())
}

/// Loads the persisted queue snapshot. A missing or corrupt document degrades to
/// an empty queue rather than failing startup (the `Fatal` error kind).
pub async fn load_snapshot(pool: &SqlitePool) -> QueueDocument {
    match SqliteKvRepository::new().get(pool, SNAPSHOT_KEY).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                log::error!("snapshot document is corrupt, starting from an empty queue: {err}");
                QueueDocument::default()
            }
        },
        Ok(None) => QueueDocument::default(),
        Err(err) => {
            log::error!("failed to load snapshot from the catalog: {err}");
            QueueDocument::default()
        }
    }
}
