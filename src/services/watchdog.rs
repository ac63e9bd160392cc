use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("failed to initialise native filesystem watcher: {0}")]
    Init(String),
}

/// Debounce window before a reconciliation is scheduled after the last observed
/// filesystem event.
const DEBOUNCE: Duration = Duration::from_secs(1);
/// Poll interval used when a native watcher could not be constructed.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub enum WatchMode {
    Native,
    Polling,
}

/// Watches the configured music root and signals the orchestrator whenever
/// reconciliation should run out of schedule. The native-watcher path and the
/// polling-fallback path are chosen once at start-up and never switched mid-run:
/// construction of the native watcher is attempted first, and any initialisation
/// error falls back to polling for the remaining lifetime of this instance.
pub struct Watchdog {
    _debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    running: Arc<AtomicBool>,
    mode: WatchMode,
}

impl Watchdog {
    pub fn start(root: &Path) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        match Self::try_native(root, tx.clone(), running.clone()) {
            Ok(debouncer) => (
                Self { _debouncer: Some(debouncer), running, mode: WatchMode::Native },
                rx,
            ),
            Err(err) => {
                log::warn!("native filesystem watcher unavailable ({err}), falling back to polling");
                let root = root.to_path_buf();
                let poll_running = running.clone();
                tokio::spawn(async move { Self::poll_loop(root, tx, poll_running).await });
                (Self { _debouncer: None, running, mode: WatchMode::Polling }, rx)
            }
        }
    }

    pub fn mode(&self) -> &WatchMode {
        &self.mode
    }

    fn try_native(
        root: &Path,
        tx: mpsc::Sender<()>,
        running: Arc<AtomicBool>,
    ) -> Result<Debouncer<RecommendedWatcher, FileIdMap>, WatchdogError> {
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(events) if !events.is_empty() => {
                    let _ = tx.try_send(());
                }
                Err(errors) => {
                    for error in errors {
                        log::warn!("filesystem watcher error: {error}");
                    }
                }
                _ => {}
            }
        })
        .map_err(|err| WatchdogError::Init(err.to_string()))?;

        debouncer
            .watch(root, notify::RecursiveMode::Recursive)
            .map_err(|err| WatchdogError::Init(err.to_string()))?;

        Ok(debouncer)
    }

    async fn poll_loop(root: PathBuf, tx: mpsc::Sender<()>, running: Arc<AtomicBool>) {
        let mut last_state: Option<(std::time::SystemTime, u64)> = None;

        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(POLL_INTERVAL).await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let state = walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.metadata().ok())
                .fold((std::time::SystemTime::UNIX_EPOCH, 0u64), |(acc_time, acc_size), meta| {
                    let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                    (acc_time.max(modified), acc_size + meta.len())
                });

            if last_state.map(|prev| prev != state).unwrap_or(false) {
                let _ = tx.try_send(());
            }
            last_state = Some(state);
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
