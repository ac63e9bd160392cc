use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Notify, RwLock};

use crate::services::collaborators::{CatalogCacheRefresher, PlaylistProvider};
use crate::services::queue::Queue;
use crate::services::sync::run_sync_cycle;
use crate::services::sync_lock::SyncLock;
use crate::utils::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    Scheduled,
    Manual,
}

/// Shared scheduling state the HTTP layer also reads/writes: the next
/// scheduled tick (a UI hint, cleared at the start of each iteration) and the
/// timer-reset signal manual syncs raise to slide the next tick forward.
pub struct SchedulerState {
    pub next_run: RwLock<Option<i64>>,
    pub timer_reset: Notify,
    pub stop: Notify,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self { next_run: RwLock::new(None), timer_reset: Notify::new(), stop: Notify::new() }
    }
}

/// Attempts to acquire the single-flight sync lock and, on success, runs one
/// full sync cycle. Returns `false` immediately without running anything if
/// the lock could not be acquired — callers must never wait for it.
pub async fn run_once(
    pool: &SqlitePool,
    provider: &dyn PlaylistProvider,
    config: &Config,
    queue: &Queue,
    sync_lock: &SyncLock,
    cache_refresher: Option<&Arc<dyn CatalogCacheRefresher>>,
    reason: SyncReason,
) -> bool {
    let now = Utc::now().timestamp();
    let guard = match sync_lock.try_acquire(now).await {
        Some(guard) => guard,
        None => {
            log::info!("sync ({reason:?}) skipped: another cycle already holds the lock");
            return false;
        }
    };

    log::info!("sync cycle starting ({reason:?})");
    let result = run_sync_cycle(
        pool,
        provider,
        &config.selected_playlists,
        queue,
        &config.host_path,
        &config.path_template,
        cache_refresher,
    )
    .await;
    match &result {
        Ok(report) if report.auth_dead => log::warn!("sync cycle aborted: authentication is no longer valid"),
        Ok(report) => log::info!(
            "sync cycle finished: fetched={} deduplicated={} pending={}",
            report.fetched,
            report.deduplicated,
            report.pending_selected
        ),
        Err(err) => log::error!("sync cycle failed: {err}"),
    }

    guard.release().await;
    true
}

/// The scheduler's single background task. Each iteration clears the next-run
/// hint, attempts `run_once(Scheduled)`, then arms the next tick and waits for
/// it — checking the stop signal and the timer-reset signal at <= 1s
/// granularity so a manual sync can slide the schedule forward without
/// restarting the loop.
#[allow(clippy::too_many_arguments)]
pub async fn run_scheduler(
    pool: SqlitePool,
    provider: Arc<dyn PlaylistProvider>,
    config: Arc<RwLock<Config>>,
    queue: Arc<Queue>,
    sync_lock: Arc<SyncLock>,
    cache_refresher: Option<Arc<dyn CatalogCacheRefresher>>,
    state: Arc<SchedulerState>,
) {
    loop {
        {
            let mut next_run = state.next_run.write().await;
            *next_run = None;
        }

        let interval_minutes = config.read().await.sync_interval_minutes;
        let cfg_snapshot = config.read().await.clone();

        run_once(
            &pool,
            provider.as_ref(),
            &cfg_snapshot,
            &queue,
            &sync_lock,
            cache_refresher.as_ref(),
            SyncReason::Scheduled,
        )
        .await;

        let next_run_at = Utc::now().timestamp() + (interval_minutes as i64) * 60;
        {
            let mut next_run = state.next_run.write().await;
            *next_run = Some(next_run_at);
        }

        if !wait_for_next_tick(&state, next_run_at).await {
            return;
        }
    }
}

/// Waits until `next_run_at`, watching for a stop request or a timer-reset at
/// <= 1s granularity. A reset rearms `next_run` to `now + interval` from the
/// moment it is observed and restarts the wait. Returns `false` if stopped.
async fn wait_for_next_tick(state: &SchedulerState, mut deadline: i64) -> bool {
    loop {
        let now = Utc::now().timestamp();
        if now >= deadline {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = state.timer_reset.notified() => {
                let interval_minutes = { *state.next_run.read().await };
                // The reset itself only matters for how long until the *next*
                // tick; the caller already wrote the post-manual-sync deadline
                // before raising the signal, so just re-read it.
                if let Some(rearmed) = interval_minutes {
                    deadline = rearmed;
                }
            }
            _ = state.stop.notified() => return false,
        }
    }
}

/// Raises the timer-reset signal after a successful manual sync: the next
/// scheduled tick slides forward by one full interval from the manual
/// completion.
pub async fn notify_manual_sync_completed(state: &SchedulerState, interval_minutes: u32) {
    let rearmed_at = Utc::now().timestamp() + (interval_minutes as i64) * 60;
    {
        let mut next_run = state.next_run.write().await;
        *next_run = Some(rearmed_at);
    }
    state.timer_reset.notify_waiters();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::domain::track::Track;
    use crate::repository::test_helpers::prepare_db;
    use crate::services::collaborators::PlaylistProviderError;
    use crate::utils::config::{AudioFormat, PlaylistFlags};

    struct EmptyProvider;

    #[async_trait]
    impl PlaylistProvider for EmptyProvider {
        async fn fetch_playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<Track>, PlaylistProviderError> {
            Ok(Vec::new())
        }
        async fn expand_artist(&self, _artist_id: &str) -> Result<Vec<Track>, PlaylistProviderError> {
            Ok(Vec::new())
        }
        async fn expand_album(&self, _album_id: &str) -> Result<Vec<Track>, PlaylistProviderError> {
            Ok(Vec::new())
        }
    }

    fn test_config() -> Config {
        let mut selected_playlists = HashMap::new();
        selected_playlists.insert("pl1".to_string(), PlaylistFlags { song: true, artist: false, album: false });
        Config {
            host_path: std::path::PathBuf::from("/music"),
            bitrate: 320,
            format: AudioFormat::Mp3,
            concurrency: 1,
            path_template: "{artist}/{title}.{ext}".to_string(),
            use_strict_matching: true,
            selected_playlists,
            sync_interval_minutes: 15,
            server_bind_addr: "127.0.0.1:8080".to_string(),
            database_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[tokio::test]
    async fn second_concurrent_run_once_is_skipped() {
        let pool = prepare_db().await.unwrap();
        let queue = Queue::new();
        let sync_lock = SyncLock::new();
        let provider = EmptyProvider;
        let config = test_config();

        let guard = sync_lock.try_acquire(0).await.unwrap();

        let ran = run_once(&pool, &provider, &config, &queue, &sync_lock, None, SyncReason::Manual).await;
        assert!(!ran);

        guard.release().await;
        let ran_after_release = run_once(&pool, &provider, &config, &queue, &sync_lock, None, SyncReason::Manual).await;
        assert!(ran_after_release);
    }
}
