use serde::{Deserialize, Serialize};

/// A track awaiting download, as surfaced on the in-memory queue.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct QueueItem {
    pub identity: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub queued_at: i64,
}

/// The track the worker is presently extracting, with a coarse stage and an
/// integer percent progress reported by the extractor's progress callback.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct CurrentItem {
    pub identity: String,
    pub artist: String,
    pub title: String,
    pub started_at: i64,
    pub stage: DownloadStage,
    pub progress: u8,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStage {
    Searching,
    Extracting,
    Tagging,
}

/// The most recent terminal outcome for a track, kept for a short trailing window.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct CompletedItem {
    pub identity: String,
    pub artist: String,
    pub title: String,
    pub finished_at: i64,
    pub outcome: CompletionOutcome,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum CompletionOutcome {
    Success,
    Failure { reason: String },
}
