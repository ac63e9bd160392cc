use std::collections::VecDeque;

use tokio::sync::Mutex;

const MAX_EVENTS: usize = 50;

/// In-memory ring of short human-readable event strings, newest first. Not
/// persisted; rebuilt empty on restart.
pub struct RecentEvents {
    events: Mutex<VecDeque<String>>,
}

impl Default for RecentEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentEvents {
    pub fn new() -> Self {
        Self { events: Mutex::new(VecDeque::with_capacity(MAX_EVENTS)) }
    }

    pub async fn push(&self, message: impl Into<String>) {
        let mut events = self.events.lock().await;
        events.push_front(message.into());
        events.truncate(MAX_EVENTS);
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.events.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_keeps_newest_first() {
        let events = RecentEvents::new();
        events.push("a").await;
        events.push("b").await;

        let snap = events.snapshot().await;
        assert_eq!(snap, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn push_caps_at_fifty_entries() {
        let events = RecentEvents::new();
        for i in 0..60 {
            events.push(format!("event {i}")).await;
        }

        let snap = events.snapshot().await;
        assert_eq!(snap.len(), MAX_EVENTS);
        assert_eq!(snap[0], "event 59");
    }
}
