use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::queue_item::{CompletedItem, CompletionOutcome, CurrentItem, DownloadStage, QueueItem};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("identity '{0}' not found in the pending queue")]
    NotInPending(String),

    #[error("identity '{0}' not found in the current queue")]
    NotInCurrent(String),
}

const MAX_COMPLETED: usize = 200;

/// Persisted projection of the live queue, rebuilt at startup from the snapshot
/// and refreshed whenever the live queue changes materially.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueDocument {
    pub pending: Vec<QueueItem>,
    pub current: Vec<CurrentItem>,
    pub completed: Vec<CompletedItem>,
}

pub struct Queue {
    inner: Mutex<QueueDocument>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(QueueDocument::default()) }
    }

    pub fn from_document(doc: QueueDocument) -> Self {
        Self { inner: Mutex::new(doc) }
    }

    pub async fn set_pending(&self, items: Vec<QueueItem>) {
        let mut doc = self.inner.lock().await;
        doc.pending = items;
    }

    /// Appends a single item to the tail of pending under one lock acquisition —
    /// used by the worker to requeue a `recently_failed` skip without racing
    /// other slots that may be popping/pushing concurrently.
    pub async fn push_pending_tail(&self, item: QueueItem) {
        let mut doc = self.inner.lock().await;
        doc.pending.push(item);
    }

    pub async fn move_to_current(&self, identity: &str, now: i64) -> Result<CurrentItem, QueueError> {
        let mut doc = self.inner.lock().await;
        let position = doc
            .pending
            .iter()
            .position(|item| item.identity == identity)
            .ok_or_else(|| QueueError::NotInPending(identity.to_string()))?;

        let item = doc.pending.remove(position);
        let current = CurrentItem {
            identity: item.identity,
            artist: item.artist,
            title: item.title,
            started_at: now,
            stage: DownloadStage::Searching,
            progress: 0,
        };
        doc.current.push(current.clone());
        Ok(current)
    }

    /// Inserts an item straight into `current`, without searching `pending` for
    /// it first. For callers that already popped the item off `pending`
    /// themselves (e.g. `take_pending_head`) and would otherwise double-remove it.
    pub async fn push_current(&self, item: QueueItem, now: i64) -> CurrentItem {
        let mut doc = self.inner.lock().await;
        let current = CurrentItem {
            identity: item.identity,
            artist: item.artist,
            title: item.title,
            started_at: now,
            stage: DownloadStage::Searching,
            progress: 0,
        };
        doc.current.push(current.clone());
        current
    }

    pub async fn update_stage(&self, identity: &str, stage: DownloadStage) {
        let mut doc = self.inner.lock().await;
        if let Some(item) = doc.current.iter_mut().find(|i| i.identity == identity) {
            item.stage = stage;
        }
    }

    /// Progress updates are lock-local and must not block: a single mutex
    /// acquisition to copy in an integer percent, nothing awaits inside it.
    pub async fn update_progress(&self, identity: &str, pct: u8) {
        let mut doc = self.inner.lock().await;
        if let Some(item) = doc.current.iter_mut().find(|i| i.identity == identity) {
            item.progress = pct.min(100);
        }
    }

    pub async fn complete(
        &self,
        identity: &str,
        outcome: CompletionOutcome,
        now: i64,
    ) -> Result<(), QueueError> {
        let mut doc = self.inner.lock().await;
        let position = doc
            .current
            .iter()
            .position(|item| item.identity == identity)
            .ok_or_else(|| QueueError::NotInCurrent(identity.to_string()))?;

        let current = doc.current.remove(position);
        let completed = CompletedItem {
            identity: current.identity,
            artist: current.artist,
            title: current.title,
            finished_at: now,
            outcome,
        };
        doc.completed.insert(0, completed);
        doc.completed.truncate(MAX_COMPLETED);
        Ok(())
    }

    /// Returns an in-flight item to the head of pending without a completed record —
    /// used for cancellation (pause/timeout), which is not a durable failure.
    pub async fn return_to_pending_head(&self, identity: &str, album: Option<String>) -> Result<(), QueueError> {
        let mut doc = self.inner.lock().await;
        let position = doc
            .current
            .iter()
            .position(|item| item.identity == identity)
            .ok_or_else(|| QueueError::NotInCurrent(identity.to_string()))?;

        let current = doc.current.remove(position);
        doc.pending.insert(
            0,
            QueueItem {
                identity: current.identity,
                artist: current.artist,
                title: current.title,
                album,
                queued_at: current.started_at,
            },
        );
        Ok(())
    }

    pub async fn snapshot(&self) -> QueueDocument {
        self.inner.lock().await.clone()
    }

    /// Replaces the entire live document, e.g. with a snapshot loaded at startup.
    pub async fn load_document(&self, doc: QueueDocument) {
        *self.inner.lock().await = doc;
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn current_len(&self) -> usize {
        self.inner.lock().await.current.len()
    }

    pub async fn take_pending_head(&self) -> Option<QueueItem> {
        let mut doc = self.inner.lock().await;
        if doc.pending.is_empty() {
            None
        } else {
            Some(doc.pending.remove(0))
        }
    }

    /// Moves every `current` item to `completed` with `status=missing`, for stale
    /// recovery after an unclean shutdown is detected while the daemon is running.
    pub async fn reset_current_to_missing(&self, now: i64) {
        let mut doc = self.inner.lock().await;
        let stale: Vec<CurrentItem> = doc.current.drain(..).collect();
        for item in stale {
            doc.completed.insert(
                0,
                CompletedItem {
                    identity: item.identity,
                    artist: item.artist,
                    title: item.title,
                    finished_at: now,
                    outcome: CompletionOutcome::Failure { reason: "stale recovery".to_string() },
                },
            );
        }
        doc.completed.truncate(MAX_COMPLETED);
    }

    /// Startup recovery: items left in `current` from an unclean shutdown are
    /// unfinished, not failed — they move back to `pending` and `current` is cleared.
    pub async fn recover_from_snapshot(&self) {
        let mut doc = self.inner.lock().await;
        let stranded: Vec<CurrentItem> = doc.current.drain(..).collect();
        for item in stranded {
            doc.pending.push(QueueItem {
                identity: item.identity,
                artist: item.artist,
                title: item.title,
                album: None,
                queued_at: item.started_at,
            });
        }
    }

    pub async fn pending_identities(&self) -> HashSet<String> {
        self.inner.lock().await.pending.iter().map(|i| i.identity.clone()).collect()
    }

    /// Identities presently being processed in `current` — excluded when
    /// rebuilding `pending` from the catalog so a row mid-download (whose
    /// catalog status hasn't reached `downloaded`/`missing` yet) is never
    /// installed into `pending` while it is still in `current`.
    pub async fn current_identities(&self) -> HashSet<String> {
        self.inner.lock().await.current.iter().map(|i| i.identity.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(identity: &str) -> QueueItem {
        QueueItem {
            identity: identity.to_string(),
            artist: "Air".to_string(),
            title: "Talisman".to_string(),
            album: Some("Moon Safari".to_string()),
            queued_at: 0,
        }
    }

    #[tokio::test]
    async fn move_to_current_removes_from_pending_disjointly() {
        let queue = Queue::new();
        queue.set_pending(vec![item("a"), item("b")]).await;

        queue.move_to_current("a", 100).await.unwrap();

        let snap = queue.snapshot().await;
        assert_eq!(snap.pending.len(), 1);
        assert_eq!(snap.current.len(), 1);
        assert!(!snap.pending.iter().any(|p| p.identity == "a"));
        assert_eq!(snap.current[0].progress, 0);
    }

    #[tokio::test]
    async fn update_progress_clamps_to_one_hundred_and_ignores_unknown_identity() {
        let queue = Queue::new();
        queue.set_pending(vec![item("a")]).await;
        queue.move_to_current("a", 0).await.unwrap();

        queue.update_progress("a", 42).await;
        assert_eq!(queue.snapshot().await.current[0].progress, 42);

        queue.update_progress("a", 250).await;
        assert_eq!(queue.snapshot().await.current[0].progress, 100);

        queue.update_progress("does-not-exist", 10).await;
        assert_eq!(queue.snapshot().await.current.len(), 1);
    }

    #[tokio::test]
    async fn complete_prepends_newest_first() {
        let queue = Queue::new();
        queue.set_pending(vec![item("a")]).await;
        queue.move_to_current("a", 0).await.unwrap();
        queue.complete("a", CompletionOutcome::Success, 10).await.unwrap();

        queue.set_pending(vec![item("b")]).await;
        queue.move_to_current("b", 20).await.unwrap();
        queue.complete("b", CompletionOutcome::Success, 30).await.unwrap();

        let snap = queue.snapshot().await;
        assert_eq!(snap.completed[0].identity, "b");
        assert_eq!(snap.completed[1].identity, "a");
    }

    #[tokio::test]
    async fn cancellation_returns_item_to_pending_head() {
        let queue = Queue::new();
        queue.set_pending(vec![item("a"), item("b")]).await;
        queue.move_to_current("a", 0).await.unwrap();

        queue.return_to_pending_head("a", Some("Moon Safari".to_string())).await.unwrap();

        let snap = queue.snapshot().await;
        assert_eq!(snap.pending[0].identity, "a");
        assert!(snap.current.is_empty());
    }

    #[tokio::test]
    async fn recover_from_snapshot_moves_current_to_pending() {
        let doc = QueueDocument {
            pending: vec![],
            current: vec![CurrentItem {
                identity: "stale".to_string(),
                artist: "Air".to_string(),
                title: "Talisman".to_string(),
                started_at: 0,
                stage: DownloadStage::Extracting,
                progress: 40,
            }],
            completed: vec![],
        };
        let queue = Queue::from_document(doc);

        queue.recover_from_snapshot().await;

        let snap = queue.snapshot().await;
        assert!(snap.current.is_empty());
        assert_eq!(snap.pending.len(), 1);
        assert_eq!(snap.pending[0].identity, "stale");
    }
}
