//! Default capability implementations wired in by `main.rs` when no concrete
//! playlist-provider / search-client / extractor integration has been
//! supplied. The real integrations (OAuth against the playlist provider, a
//! video-catalog search backend, an audio extractor binary) are explicitly out
//! of scope for the orchestrator — these stand-ins keep the daemon runnable
//! end-to-end against the control surface and the scheduler/worker loops
//! while making the missing integration visible in logs and `recent[]` rather
//! than silently no-op'ing.

use async_trait::async_trait;

use crate::domain::track::Track;
use crate::services::collaborators::{
    Candidate, DownloadRequest, Extractor, ExtractorError, PlaylistProvider, PlaylistProviderError,
    ProgressCallback, SearchClient, SearchClientError,
};

/// Reports every call as auth-dead, which the sync cycle treats as "abort
/// cleanly, no catalog mutation" — the correct behaviour until a real
/// playlist-provider integration is wired in.
pub struct UnconfiguredPlaylistProvider;

#[async_trait]
impl PlaylistProvider for UnconfiguredPlaylistProvider {
    async fn fetch_playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<Track>, PlaylistProviderError> {
        Err(PlaylistProviderError::AuthDead("no playlist provider configured".to_string()))
    }

    async fn expand_artist(&self, _artist_id: &str) -> Result<Vec<Track>, PlaylistProviderError> {
        Ok(Vec::new())
    }

    async fn expand_album(&self, _album_id: &str) -> Result<Vec<Track>, PlaylistProviderError> {
        Ok(Vec::new())
    }
}

/// Always returns zero candidates, which the worker correctly treats as a
/// durable "no match" failure rather than crashing.
pub struct UnconfiguredSearchClient;

#[async_trait]
impl SearchClient for UnconfiguredSearchClient {
    async fn search_candidates(&self, _artist: &str, _title: &str) -> Result<Vec<Candidate>, SearchClientError> {
        Ok(Vec::new())
    }
}

/// Always fails with a descriptive reason, so an operator who starts the
/// daemon without wiring a real extractor sees why every download lands in
/// `missing` instead of silently hanging.
pub struct UnconfiguredExtractor;

#[async_trait]
impl Extractor for UnconfiguredExtractor {
    async fn download(
        &self,
        _request: DownloadRequest<'_>,
        _progress: ProgressCallback,
    ) -> Result<std::path::PathBuf, ExtractorError> {
        Err(ExtractorError::Failed("no audio extractor configured".to_string()))
    }
}
