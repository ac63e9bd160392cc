use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::repository::{SqliteKvRepository, SqliteTracksRepository};
use crate::repository::tracks_repo::CatalogCounts;
use crate::services::collaborators::{CatalogCacheRefresher, Extractor, PlaylistProvider, SearchClient};
use crate::services::events::RecentEvents;
use crate::services::queue::{Queue, QueueDocument};
use crate::services::scheduler::{self, SchedulerState, SyncReason};
use crate::services::sync::{load_snapshot, reconcile_catalog};
use crate::services::sync_lock::SyncLock;
use crate::services::watchdog::Watchdog;
use crate::services::worker::{self, PauseSignal};
use crate::utils::config::Config;

/// A running watchdog plus the task forwarding its signals into reconciliation.
/// Dropping this (e.g. when the watchdog is restarted after a `host_path`
/// change) stops the forwarding task and, via `Watchdog`'s own `Drop`, the
/// watcher or poll loop underneath it.
struct WatchdogHandle {
    _watchdog: Watchdog,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns every piece of process-wide mutable state the orchestrator's control
/// loops and the HTTP surface share: the live queue, the single-flight sync
/// lock, the recent-event log, the pause signal, the scheduler's timer state,
/// and the injected capability interfaces. Constructed once in `main` and
/// handed to the scheduler task, the worker task, the watchdog, and the HTTP
/// router as an `Arc`.
pub struct Orchestrator {
    pub pool: SqlitePool,
    pub config_path: String,
    pub config: Arc<RwLock<Config>>,
    pub queue: Arc<Queue>,
    pub sync_lock: Arc<SyncLock>,
    pub events: Arc<RecentEvents>,
    pub pause: Arc<PauseSignal>,
    pub scheduler_state: Arc<SchedulerState>,
    pub worker_running: Arc<AtomicBool>,
    pub worker_stop: Arc<Notify>,
    pub provider: Arc<dyn PlaylistProvider>,
    pub search: Arc<dyn SearchClient>,
    pub extractor: Arc<dyn Extractor>,
    pub cache_refresher: Option<Arc<dyn CatalogCacheRefresher>>,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        config_path: String,
        config: Config,
        provider: Arc<dyn PlaylistProvider>,
        search: Arc<dyn SearchClient>,
        extractor: Arc<dyn Extractor>,
        cache_refresher: Option<Arc<dyn CatalogCacheRefresher>>,
    ) -> Self {
        Self {
            pool,
            config_path,
            config: Arc::new(RwLock::new(config)),
            queue: Arc::new(Queue::new()),
            sync_lock: Arc::new(SyncLock::new()),
            events: Arc::new(RecentEvents::new()),
            pause: Arc::new(PauseSignal::new()),
            scheduler_state: Arc::new(SchedulerState::default()),
            worker_running: Arc::new(AtomicBool::new(false)),
            worker_stop: Arc::new(Notify::new()),
            provider,
            search,
            extractor,
            cache_refresher,
            watchdog: Mutex::new(None),
        }
    }

    /// Starts the filesystem watchdog for the current `host_path` and wires its
    /// signals to `reconcile_catalog`. Called once at start-up; `update_config`
    /// calls `restart_watchdog` instead of this when `host_path` changes.
    pub async fn start_watchdog(&self) {
        let config = self.config.read().await;
        let host_path = config.host_path.clone();
        let path_template = config.path_template.clone();
        drop(config);
        self.spawn_watchdog_for(host_path, path_template).await;
    }

    /// Stops the watchdog and its forwarding task. The caller is responsible for
    /// calling this before process exit; `start_watchdog`/`restart_watchdog`
    /// otherwise leak the previous watcher's background task.
    pub async fn stop_watchdog(&self) {
        *self.watchdog.lock().await = None;
    }

    async fn spawn_watchdog_for(&self, host_path: PathBuf, path_template: String) {
        let (watchdog, mut watch_rx) = Watchdog::start(&host_path);
        let pool = self.pool.clone();
        let queue = self.queue.clone();
        let cache_refresher = self.cache_refresher.clone();

        let task = tokio::spawn(async move {
            while watch_rx.recv().await.is_some() {
                if let Err(err) =
                    reconcile_catalog(&pool, &queue, &host_path, &path_template, cache_refresher.as_ref()).await
                {
                    log::warn!("reconciliation triggered by filesystem watch failed: {err}");
                }
            }
        });

        *self.watchdog.lock().await = Some(WatchdogHandle { _watchdog: watchdog, task });
    }

    /// Startup recovery per §4.D: load the persisted snapshot, move any
    /// stranded `current` items back to `pending`, and persist the recovered
    /// shape so a crash loop cannot repeatedly "lose" the same item.
    pub async fn recover_from_snapshot(&self) {
        let doc = load_snapshot(&self.pool).await;
        self.queue.load_document(doc).await;
        self.queue.recover_from_snapshot().await;
        let _ = crate::services::sync::save_snapshot(&self.pool, &self.queue.snapshot().await).await;
    }

    pub async fn run_once(&self, reason: SyncReason) -> bool {
        let config = self.config.read().await.clone();
        let ran = scheduler::run_once(
            &self.pool,
            self.provider.as_ref(),
            &config,
            &self.queue,
            &self.sync_lock,
            self.cache_refresher.as_ref(),
            reason,
        )
        .await;

        if ran && reason == SyncReason::Manual {
            scheduler::notify_manual_sync_completed(&self.scheduler_state, config.sync_interval_minutes).await;
        }

        ran
    }

    pub fn spawn_scheduler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler(
                this.pool.clone(),
                this.provider.clone(),
                this.config.clone(),
                this.queue.clone(),
                this.sync_lock.clone(),
                this.cache_refresher.clone(),
                this.scheduler_state.clone(),
            )
            .await;
        })
    }

    pub fn spawn_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            worker::run_worker(
                this.pool.clone(),
                this.queue.clone(),
                this.pause.clone(),
                this.events.clone(),
                this.search.clone(),
                this.extractor.clone(),
                this.config.clone(),
                this.worker_stop.clone(),
                this.worker_running.clone(),
                this.cache_refresher.clone(),
            )
            .await;
        })
    }

    /// Signals the scheduler and worker loops to stop at their next <= 1s
    /// check. The caller is responsible for flushing the queue snapshot
    /// afterwards (`main` does this before exiting).
    pub fn request_shutdown(&self) {
        self.scheduler_state.stop.notify_waiters();
        self.worker_stop.notify_waiters();
    }

    pub fn pause_downloads(&self) {
        self.pause.pause();
    }

    pub fn resume_downloads(&self) {
        self.pause.resume();
    }

    /// `/reset-queue`: stale recovery for items stuck in `current`, e.g. after
    /// an unclean worker restart that left the live queue inconsistent with
    /// reality without a full process restart.
    pub async fn reset_queue(&self) {
        let now = Utc::now().timestamp();
        self.queue.reset_current_to_missing(now).await;
        let _ = crate::services::sync::save_snapshot(&self.pool, &self.queue.snapshot().await).await;
    }

    /// `/reset-errors`: clears retry deferrals and requeues failed items
    /// immediately, then rebuilds the pending queue from the catalog.
    pub async fn reset_errors(&self) -> Result<u64, crate::repository::RepositoryError> {
        let affected = SqliteTracksRepository::new().reset_all_errors(&self.pool).await?;
        let config = self.config.read().await.clone();
        let _ = reconcile_catalog(
            &self.pool,
            &self.queue,
            &config.host_path,
            &config.path_template,
            self.cache_refresher.as_ref(),
        )
        .await;
        Ok(affected)
    }

    pub async fn catalog_counts(&self) -> Result<CatalogCounts, crate::repository::RepositoryError> {
        SqliteTracksRepository::new().counts(&self.pool).await
    }

    pub async fn catalog_counts_by_status(
        &self,
    ) -> Result<crate::repository::tracks_repo::TrackCounts, crate::repository::RepositoryError> {
        SqliteTracksRepository::new().counts_by_status(&self.pool).await
    }

    pub async fn queue_snapshot(&self) -> QueueDocument {
        self.queue.snapshot().await
    }

    pub async fn recent_events(&self) -> Vec<String> {
        self.events.snapshot().await
    }

    pub async fn next_run(&self) -> Option<i64> {
        *self.scheduler_state.next_run.read().await
    }

    pub async fn config_snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// `/config` POST: validates, persists to both the `config` key-value row
    /// and the TOML file the process was launched with (so either source can
    /// rebuild the other on the next restart), then swaps the live config and
    /// restarts the watchdog if `host_path` changed. A failure to rewrite the
    /// file is logged but not fatal to the request — the database row is still
    /// the source of truth `load_effective_config` prefers at start-up.
    pub async fn update_config(&self, new_config: Config) -> Result<(), crate::utils::config::ConfigError> {
        new_config.validate()?;
        let serialized = new_config.to_toml_string()?;
        SqliteKvRepository::new()
            .set(&self.pool, "config", &serialized)
            .await
            .map_err(|err| crate::utils::config::ConfigError::FailedToSerializeConfig(err.to_string()))?;

        if let Err(err) = new_config.save_to_file(&self.config_path) {
            log::warn!("failed to rewrite {} after a /config update: {err}", self.config_path);
        }

        let host_path_changed = self.config.read().await.host_path != new_config.host_path;
        let host_path = new_config.host_path.clone();
        let path_template = new_config.path_template.clone();

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if host_path_changed {
            log::info!("host_path changed, restarting the filesystem watchdog at {}", host_path.display());
            self.spawn_watchdog_for(host_path, path_template).await;
        }

        Ok(())
    }
}
