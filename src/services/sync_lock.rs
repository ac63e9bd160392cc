use std::sync::Mutex;

const SYNC_TIMEOUT_SECS: i64 = 1800;

struct LockState {
    busy: bool,
    busy_since: Option<i64>,
}

/// Process-wide, non-reentrant, non-blocking single-flight guard for sync cycles.
/// A caller attempting to acquire while busy gets an immediate "not acquired"
/// result — it never waits. A watchdog inside the lock auto-recovers a holder
/// that has been busy for longer than 30 minutes, treating it as defunct.
///
/// The busy flag lives behind a plain `std::sync::Mutex` rather than a
/// `tokio::sync::Mutex`: it is only ever held for the span of a few field
/// reads/writes, never across an `.await`, and a synchronous mutex is what
/// lets the guard release it inline from `Drop` instead of spawning a task.
pub struct SyncLock {
    state: Mutex<LockState>,
}

impl Default for SyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncLock {
    pub fn new() -> Self {
        Self { state: Mutex::new(LockState { busy: false, busy_since: None }) }
    }

    /// Attempts to acquire the lock. Returns a guard on success; `None` if another
    /// cycle currently holds it and has not exceeded the auto-recovery timeout.
    pub async fn try_acquire(&self, now: i64) -> Option<SyncLockGuard<'_>> {
        let mut state = self.state.lock().expect("sync lock state mutex poisoned");

        if state.busy {
            let stale = state
                .busy_since
                .map(|since| now - since > SYNC_TIMEOUT_SECS)
                .unwrap_or(false);

            if !stale {
                return None;
            }
            log::warn!("sync lock held for over {SYNC_TIMEOUT_SECS}s, treating prior holder as defunct");
        }

        state.busy = true;
        state.busy_since = Some(now);
        Some(SyncLockGuard { lock: self })
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().expect("sync lock state mutex poisoned").busy
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("sync lock state mutex poisoned");
        state.busy = false;
        state.busy_since = None;
    }
}

/// Releases the lock when dropped, or earlier via the explicit `release()`.
pub struct SyncLockGuard<'a> {
    lock: &'a SyncLock,
}

impl<'a> SyncLockGuard<'a> {
    pub async fn release(self) {
        self.lock.release();
        std::mem::forget(self);
    }
}

impl<'a> Drop for SyncLockGuard<'a> {
    fn drop(&mut self) {
        // Best-effort: normal shutdown paths call `release().await` explicitly;
        // this only guards against a future caller forgetting to.
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_first_holds() {
        let lock = SyncLock::new();
        let first = lock.try_acquire(0).await;
        assert!(first.is_some());

        let second = lock.try_acquire(1).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_allows_next_acquire() {
        let lock = SyncLock::new();
        let first = lock.try_acquire(0).await.unwrap();
        first.release().await;

        let second = lock.try_acquire(1).await;
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn stale_lock_auto_recovers_after_timeout() {
        let lock = SyncLock::new();
        let first = lock.try_acquire(0).await;
        assert!(first.is_some());
        std::mem::forget(first);

        let recovered = lock.try_acquire(1801).await;
        assert!(recovered.is_some());
    }

    #[tokio::test]
    async fn lock_within_timeout_stays_held() {
        let lock = SyncLock::new();
        let first = lock.try_acquire(0).await;
        assert!(first.is_some());
        std::mem::forget(first);

        let still_busy = lock.try_acquire(1799).await;
        assert!(still_busy.is_none());
    }
}
