use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Notify};

use crate::domain::queue_item::{CompletionOutcome, DownloadStage};
use crate::repository::SqliteTracksRepository;
use crate::services::backoff;
use crate::services::collaborators::{
    Candidate, CatalogCacheRefresher, DownloadRequest, Extractor, ExtractorError, ProgressCallback, SearchClient,
    SearchClientError,
};
use crate::services::events::RecentEvents;
use crate::services::matcher::{select_first_match, MatchMode, MatchTarget};
use crate::services::queue::Queue;
use crate::services::sync::reconcile_catalog;
use crate::utils::config::Config;

/// Per-item extraction timeout. On timeout the in-flight download is abandoned
/// and the outcome is a cancelled failure, not a durable one.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// After this many consecutive re-selection skips, `recently_failed` is cleared
/// unconditionally to force re-evaluation against the catalog.
const RECENTLY_FAILED_CLEAR_THRESHOLD: usize = 50;

/// Cooperative pause signal shared between the HTTP layer and the worker.
/// `pause()` also notifies any in-flight download's cancel signal.
#[derive(Default)]
pub struct PauseSignal {
    paused: AtomicBool,
    cancel: Notify,
    resume: Notify,
}

impl PauseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn wait_until_resumed(&self) {
        while self.is_paused() {
            self.resume.notified().await;
        }
    }
}

/// Tracks identities that just failed, so the worker does not immediately
/// re-select them before the next reconciliation pass re-reads the catalog.
/// This is purely an optimisation — the durable retry gate is `retry_after`.
#[derive(Default)]
struct RecentlyFailed {
    set: Mutex<HashSet<String>>,
    skips_since_clear: Mutex<usize>,
}

impl RecentlyFailed {
    async fn insert(&self, identity: &str) {
        self.set.lock().await.insert(identity.to_string());
    }

    async fn should_skip(&self, identity: &str) -> bool {
        let mut skips = self.skips_since_clear.lock().await;
        let contains = self.set.lock().await.contains(identity);
        if contains {
            *skips += 1;
            if *skips >= RECENTLY_FAILED_CLEAR_THRESHOLD {
                self.set.lock().await.clear();
                *skips = 0;
                return false;
            }
        }
        contains
    }
}

enum Outcome {
    Success { local_path: std::path::PathBuf },
    Failure { reason: String },
    Cancelled,
}

/// Runs `concurrency` independent worker slots, each sequentially draining the
/// shared pending queue. `pending`/`current` mutation is atomic under the
/// queue's single mutex, so slots never select the same identity twice.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
    pool: SqlitePool,
    queue: Arc<Queue>,
    pause: Arc<PauseSignal>,
    events: Arc<RecentEvents>,
    search: Arc<dyn SearchClient>,
    extractor: Arc<dyn Extractor>,
    config: Arc<tokio::sync::RwLock<Config>>,
    stop: Arc<Notify>,
    worker_running: Arc<AtomicBool>,
    cache_refresher: Option<Arc<dyn CatalogCacheRefresher>>,
) {
    let concurrency = config.read().await.concurrency.max(1) as usize;
    let recently_failed = Arc::new(RecentlyFailed::default());
    worker_running.store(true, Ordering::SeqCst);

    let mut slots = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let pool = pool.clone();
        let queue = queue.clone();
        let pause = pause.clone();
        let events = events.clone();
        let search = search.clone();
        let extractor = extractor.clone();
        let config = config.clone();
        let stop = stop.clone();
        let recently_failed = recently_failed.clone();
        let cache_refresher = cache_refresher.clone();

        slots.push(tokio::spawn(async move {
            run_slot(
                pool,
                queue,
                pause,
                events,
                search,
                extractor,
                config,
                stop,
                recently_failed,
                DOWNLOAD_TIMEOUT_SECS,
                cache_refresher,
            )
            .await;
        }));
    }

    for slot in slots {
        let _ = slot.await;
    }

    worker_running.store(false, Ordering::SeqCst);
}

#[allow(clippy::too_many_arguments)]
async fn run_slot(
    pool: SqlitePool,
    queue: Arc<Queue>,
    pause: Arc<PauseSignal>,
    events: Arc<RecentEvents>,
    search: Arc<dyn SearchClient>,
    extractor: Arc<dyn Extractor>,
    config: Arc<tokio::sync::RwLock<Config>>,
    stop: Arc<Notify>,
    recently_failed: Arc<RecentlyFailed>,
    timeout_secs: u64,
    cache_refresher: Option<Arc<dyn CatalogCacheRefresher>>,
) {
    let tracks_repo = SqliteTracksRepository::new();

    loop {
        if pause.is_paused() {
            tokio::select! {
                _ = pause.wait_until_resumed() => {}
                _ = stop.notified() => return,
            }
        }

        let item = match queue.take_pending_head().await {
            Some(item) => item,
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    _ = stop.notified() => return,
                }
            }
        };

        if recently_failed.should_skip(&item.identity).await {
            // Put it back at the tail so other eligible items get a turn.
            queue.push_pending_tail(item).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        let now = Utc::now().timestamp();
        queue.push_current(item.clone(), now).await;
        queue.update_stage(&item.identity, DownloadStage::Extracting).await;

        let mode = if config.read().await.use_strict_matching {
            MatchMode::Strict
        } else {
            MatchMode::Fuzzy
        };

        let duration = tracks_repo
            .by_identity_fetch(&pool, &item.identity)
            .await
            .ok()
            .flatten()
            .map(|track| track.duration())
            .unwrap_or(0);

        let outcome = process_item(
            &item.identity,
            &item.artist,
            &item.title,
            duration,
            mode,
            search.as_ref(),
            extractor.as_ref(),
            &config,
            &pause,
            timeout_secs,
            &queue,
        )
        .await;

        queue.update_stage(&item.identity, DownloadStage::Tagging).await;

        match outcome {
            Outcome::Success { local_path } => {
                let now = Utc::now().timestamp();
                let _ = tracks_repo
                    .mark_downloaded(&pool, &item.identity, &local_path.to_string_lossy(), now)
                    .await;
                events.push(format!("Downloaded \"{}\" by {}", item.title, item.artist)).await;
                let _ = queue.complete(&item.identity, CompletionOutcome::Success, now).await;
            }
            Outcome::Failure { reason } => {
                let track = tracks_repo.by_identity_fetch(&pool, &item.identity).await.ok().flatten();
                let next_attempt = track.map(|t| t.download_attempts() + 1).unwrap_or(1);
                let now = Utc::now().timestamp();
                let retry_after = backoff::retry_after(now, next_attempt);
                let _ = tracks_repo.mark_missing(&pool, &item.identity, &reason, retry_after).await;
                recently_failed.insert(&item.identity).await;
                events.push(format!("Failed \"{}\" by {}: {reason}", item.title, item.artist)).await;
                let _ = queue
                    .complete(&item.identity, CompletionOutcome::Failure { reason }, now)
                    .await;
            }
            Outcome::Cancelled => {
                let _ = queue.return_to_pending_head(&item.identity, item.album.clone()).await;
            }
        }

        let config_snapshot = config.read().await.clone();
        let _ = reconcile_catalog(
            &pool,
            &queue,
            &config_snapshot.host_path,
            &config_snapshot.path_template,
            cache_refresher.as_ref(),
        )
        .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_item(
    identity: &str,
    artist: &str,
    title: &str,
    duration: u32,
    mode: MatchMode,
    search: &dyn SearchClient,
    extractor: &dyn Extractor,
    config: &Arc<tokio::sync::RwLock<Config>>,
    pause: &Arc<PauseSignal>,
    timeout_secs: u64,
    queue: &Arc<Queue>,
) -> Outcome {
    let candidates = match search.search_candidates(artist, title).await {
        Ok(candidates) => candidates,
        Err(SearchClientError::Other(reason)) => return Outcome::Failure { reason },
    };

    let target = MatchTarget { artist, title, duration };
    let matched: Option<&Candidate> = select_first_match(mode, &target, &candidates);

    let candidate = match matched {
        Some(candidate) => candidate.clone(),
        None => {
            log::info!("no match for identity '{identity}' among {} candidates", candidates.len());
            return Outcome::Failure { reason: "no match".to_string() };
        }
    };

    let (output_template, bitrate, format) = {
        let cfg = config.read().await;
        (cfg.path_template.clone(), cfg.bitrate, format!("{:?}", cfg.format).to_lowercase())
    };

    // The extractor's callback is a plain sync `Fn`, so it only has to push onto a
    // watch channel (cheap, non-blocking) rather than touch the queue directly; a
    // short-lived forwarder task applies each update to the queue's `current` item
    // under its own lock acquisition, keeping the callback itself lock-free.
    let (progress_tx, mut progress_rx) = tokio::sync::watch::channel(0u8);
    let forwarder_queue = queue.clone();
    let forwarder_identity = identity.to_string();
    let forwarder = tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let pct = *progress_rx.borrow();
            forwarder_queue.update_progress(&forwarder_identity, pct).await;
        }
    });

    let progress: ProgressCallback = Box::new(move |pct| {
        let _ = progress_tx.send(pct);
    });

    let request = DownloadRequest {
        candidate: &candidate,
        output_path_template: &output_template,
        bitrate,
        format: &format,
    };

    let outcome = tokio::select! {
        result = extractor.download(request, progress) => {
            match result {
                Ok(local_path) => Outcome::Success { local_path },
                Err(ExtractorError::Cancelled) => Outcome::Cancelled,
                Err(ExtractorError::Failed(reason)) => Outcome::Failure { reason },
            }
        }
        _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => Outcome::Cancelled,
        _ = pause.cancel.notified() => Outcome::Cancelled,
    };

    forwarder.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use crate::domain::ExpandedFrom;
    use crate::domain::track::NewTrack;
    use crate::repository::test_helpers::prepare_db;
    use crate::services::collaborators::ProgressCallback;
    use crate::utils::config::{AudioFormat, PlaylistFlags};

    fn test_config() -> Config {
        Config {
            host_path: std::path::PathBuf::from("/music"),
            bitrate: 320,
            format: AudioFormat::Mp3,
            concurrency: 2,
            path_template: "{artist}/{title}.{ext}".to_string(),
            use_strict_matching: true,
            selected_playlists: HashMap::new(),
            sync_interval_minutes: 15,
            server_bind_addr: "127.0.0.1:8080".to_string(),
            database_path: std::path::PathBuf::from(":memory:"),
        }
    }

    struct StubSearch;

    #[async_trait]
    impl SearchClient for StubSearch {
        async fn search_candidates(&self, artist: &str, title: &str) -> Result<Vec<Candidate>, SearchClientError> {
            Ok(vec![Candidate {
                source_id: "abc".to_string(),
                artist: artist.to_string(),
                title: title.to_string(),
                duration: 200,
            }])
        }
    }

    struct SlowExtractor {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_observed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Extractor for SlowExtractor {
        async fn download(
            &self,
            request: DownloadRequest<'_>,
            _progress: ProgressCallback,
        ) -> Result<std::path::PathBuf, ExtractorError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(std::path::PathBuf::from(format!("/music/{}.mp3", request.candidate.title)))
        }
    }

    fn sample_track(id: &str, duration: u32) -> crate::domain::track::Track {
        crate::domain::track::Track::new(NewTrack {
            identity: id.to_string(),
            artist: "Air".to_string(),
            title: id.to_string(),
            album: None,
            duration,
            playlist_id: None,
            spotify_id: None,
            expanded_from: ExpandedFrom::Playlist,
            last_seen: 0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn concurrency_cap_bounds_max_in_flight_downloads() {
        let pool = prepare_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let tracks: Vec<_> = (0..5).map(|i| sample_track(&format!("t{i}"), 200)).collect();
        tracks_repo.upsert_tracks(&pool, &tracks).await.unwrap();

        let queue = Arc::new(Queue::new());
        queue
            .set_pending(
                tracks
                    .iter()
                    .map(|t| crate::domain::queue_item::QueueItem {
                        identity: t.identity().to_string(),
                        artist: t.artist().to_string(),
                        title: t.title().to_string(),
                        album: None,
                        queued_at: 0,
                    })
                    .collect(),
            )
            .await;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let extractor: Arc<dyn Extractor> = Arc::new(SlowExtractor {
            delay: Duration::from_millis(50),
            in_flight: in_flight.clone(),
            max_observed: max_observed.clone(),
        });

        let mut cfg = test_config();
        cfg.concurrency = 2;
        let config = Arc::new(tokio::sync::RwLock::new(cfg));
        let pause = Arc::new(PauseSignal::new());
        let events = Arc::new(RecentEvents::new());
        let stop = Arc::new(Notify::new());
        let worker_running = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            pool.clone(),
            queue.clone(),
            pause,
            events,
            Arc::new(StubSearch),
            extractor,
            config,
            stop.clone(),
            worker_running,
            None,
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        stop.notify_waiters();
        let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
        assert!(max_observed.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn pause_returns_in_flight_item_to_pending_without_marking_failure() {
        let pool = prepare_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let track = sample_track("slow-one", 200);
        tracks_repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();

        let queue = Arc::new(Queue::new());
        queue
            .set_pending(vec![crate::domain::queue_item::QueueItem {
                identity: track.identity().to_string(),
                artist: track.artist().to_string(),
                title: track.title().to_string(),
                album: None,
                queued_at: 0,
            }])
            .await;

        let extractor: Arc<dyn Extractor> = Arc::new(SlowExtractor {
            delay: Duration::from_secs(5),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_observed: Arc::new(AtomicUsize::new(0)),
        });

        let mut cfg = test_config();
        cfg.concurrency = 1;
        let config = Arc::new(tokio::sync::RwLock::new(cfg));
        let pause = Arc::new(PauseSignal::new());
        let events = Arc::new(RecentEvents::new());
        let stop = Arc::new(Notify::new());
        let worker_running = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            pool.clone(),
            queue.clone(),
            pause.clone(),
            events,
            Arc::new(StubSearch),
            extractor,
            config,
            stop.clone(),
            worker_running,
            None,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        pause.pause();
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.notify_waiters();
        let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;

        let snapshot = queue.snapshot().await;
        assert!(snapshot.current.is_empty());
        assert_eq!(snapshot.pending.len() + snapshot.completed.len(), 1);

        let fetched = tracks_repo.by_identity_fetch(&pool, track.identity()).await.unwrap().unwrap();
        assert_eq!(fetched.download_attempts(), 0);
    }

    struct ProgressReportingExtractor {
        delay: Duration,
        output_dir: std::path::PathBuf,
    }

    #[async_trait]
    impl Extractor for ProgressReportingExtractor {
        async fn download(
            &self,
            request: DownloadRequest<'_>,
            progress: ProgressCallback,
        ) -> Result<std::path::PathBuf, ExtractorError> {
            progress(50);
            tokio::time::sleep(self.delay).await;
            progress(100);
            let path = self.output_dir.join(format!("{}.mp3", request.candidate.title));
            std::fs::write(&path, b"noop").unwrap();
            Ok(path)
        }
    }

    #[tokio::test]
    async fn progress_callback_updates_current_items_progress_under_the_queue_lock() {
        let pool = prepare_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let track = sample_track("progressing", 200);
        tracks_repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();

        let queue = Arc::new(Queue::new());
        queue
            .set_pending(vec![crate::domain::queue_item::QueueItem {
                identity: track.identity().to_string(),
                artist: track.artist().to_string(),
                title: track.title().to_string(),
                album: None,
                queued_at: 0,
            }])
            .await;

        let music_dir = tempfile::tempdir().unwrap();
        let extractor: Arc<dyn Extractor> = Arc::new(ProgressReportingExtractor {
            delay: Duration::from_millis(300),
            output_dir: music_dir.path().to_path_buf(),
        });

        let mut cfg = test_config();
        cfg.host_path = music_dir.path().to_path_buf();
        let config = Arc::new(tokio::sync::RwLock::new(cfg));
        let pause = Arc::new(PauseSignal::new());
        let events = Arc::new(RecentEvents::new());
        let stop = Arc::new(Notify::new());
        let worker_running = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            pool.clone(),
            queue.clone(),
            pause,
            events,
            Arc::new(StubSearch),
            extractor,
            config,
            stop.clone(),
            worker_running,
            None,
        ));

        let mut observed_fifty = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let snapshot = queue.snapshot().await;
            if snapshot.current.first().map(|item| item.progress) == Some(50) {
                observed_fifty = true;
                break;
            }
        }
        assert!(observed_fifty, "expected the in-flight item's progress to reach 50 before completion");

        stop.notify_waiters();
        let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;

        let fetched = tracks_repo.by_identity_fetch(&pool, track.identity()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), crate::domain::TrackStatus::Downloaded);
    }
}
