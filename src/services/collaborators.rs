use async_trait::async_trait;

use crate::domain::track::Track;

#[derive(Debug, thiserror::Error)]
pub enum PlaylistProviderError {
    /// Token revoked, not authenticated, or refresh failed. The sync phase must
    /// abort cleanly with no catalog mutation when this is returned.
    #[error("authentication is no longer valid: {0}")]
    AuthDead(String),

    /// One playlist forbidden or scope-insufficient; the remainder still proceeds.
    #[error("playlist '{playlist_id}' is not accessible: {reason}")]
    PartialAccess { playlist_id: String, reason: String },

    /// A server-provided retry-after hint to honour before trying again.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("playlist provider error: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub source_id: String,
    pub artist: String,
    pub title: String,
    pub duration: u32,
}

impl crate::services::matcher::AsMatchCandidate for Candidate {
    fn as_match_candidate(&self) -> crate::services::matcher::MatchCandidate<'_> {
        crate::services::matcher::MatchCandidate {
            artist: &self.artist,
            title: &self.title,
            duration: self.duration,
        }
    }
}

/// The playlist-provider client, out of scope beyond this contract: OAuth token
/// lifecycle, playlist enumeration and track listing live entirely behind it.
#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>, PlaylistProviderError>;

    /// Expansion is capped by the caller at 100 ids per cycle; the capability
    /// itself just expands whatever single id it is given.
    async fn expand_artist(&self, artist_id: &str) -> Result<Vec<Track>, PlaylistProviderError>;

    async fn expand_album(&self, album_id: &str) -> Result<Vec<Track>, PlaylistProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SearchClientError {
    #[error("search backend error: {0}")]
    Other(String),
}

/// The video-catalog search client.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search_candidates(&self, artist: &str, title: &str) -> Result<Vec<Candidate>, SearchClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor failed: {0}")]
    Failed(String),

    #[error("download was cancelled")]
    Cancelled,
}

pub struct DownloadRequest<'a> {
    pub candidate: &'a Candidate,
    pub output_path_template: &'a str,
    pub bitrate: u32,
    pub format: &'a str,
}

/// Integer-percent progress callback; it must be cheap and non-blocking, since the
/// worker updates the live queue's `current` item progress under its lock from it.
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

/// The audio extractor: out of scope beyond `download`, no transcoding beyond
/// invoking it, no exactly-once guarantee (at-least-once with idempotent placement).
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn download(
        &self,
        request: DownloadRequest<'_>,
        progress: ProgressCallback,
    ) -> Result<std::path::PathBuf, ExtractorError>;
}

/// Notified after a sync cycle's reconciliation completes, so an in-memory
/// `/catalog/*` projection can be refreshed without re-querying the database on
/// every request. Optional — the orchestrator tolerates no refresher being wired.
#[async_trait]
pub trait CatalogCacheRefresher: Send + Sync {
    async fn refresh(&self, tracks: &[Track]);
}
