use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{ExpandedFrom, TrackStatus, ValidationError};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Track {
    identity: String,
    artist: String,
    title: String,
    album: Option<String>,
    duration: u32,
    playlist_id: Option<String>,
    spotify_id: Option<String>,
    expanded_from: ExpandedFrom,
    status: TrackStatus,
    local_path: Option<PathBuf>,
    last_error: Option<String>,
    retry_after: Option<i64>,
    download_attempts: u32,
    last_seen: i64,
}

impl AsRef<Track> for Track {
    fn as_ref(&self) -> &Track {
        self
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Track {}

pub struct NewTrack {
    pub identity: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub duration: u32,
    pub playlist_id: Option<String>,
    pub spotify_id: Option<String>,
    pub expanded_from: ExpandedFrom,
    pub last_seen: i64,
}

impl Track {
    /// Constructs a freshly-discovered, not-yet-downloaded track.
    pub fn new(params: NewTrack) -> Result<Self, ValidationError> {
        if params.artist.trim().is_empty() {
            return Err(ValidationError::ArtistIsEmptyString);
        }
        if params.title.trim().is_empty() {
            return Err(ValidationError::TitleIsEmptyString);
        }
        if params.duration == 0 {
            return Err(ValidationError::DurationIsZero);
        }

        Ok(Self {
            identity: params.identity,
            artist: params.artist,
            title: params.title,
            album: params.album,
            duration: params.duration,
            playlist_id: params.playlist_id,
            spotify_id: params.spotify_id,
            expanded_from: params.expanded_from,
            status: TrackStatus::Pending,
            local_path: None,
            last_error: None,
            retry_after: None,
            download_attempts: 0,
            last_seen: params.last_seen,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        identity: String,
        artist: String,
        title: String,
        album: Option<String>,
        duration: u32,
        playlist_id: Option<String>,
        spotify_id: Option<String>,
        expanded_from: ExpandedFrom,
        status: TrackStatus,
        local_path: Option<PathBuf>,
        last_error: Option<String>,
        retry_after: Option<i64>,
        download_attempts: u32,
        last_seen: i64,
    ) -> Result<Self, ValidationError> {
        if artist.trim().is_empty() {
            return Err(ValidationError::ArtistIsEmptyString);
        }
        if title.trim().is_empty() {
            return Err(ValidationError::TitleIsEmptyString);
        }
        if duration == 0 {
            return Err(ValidationError::DurationIsZero);
        }

        Ok(Self {
            identity,
            artist,
            title,
            album,
            duration,
            playlist_id,
            spotify_id,
            expanded_from,
            status,
            local_path,
            last_error,
            retry_after,
            download_attempts,
            last_seen,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn album(&self) -> Option<&str> {
        self.album.as_deref()
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn playlist_id(&self) -> Option<&str> {
        self.playlist_id.as_deref()
    }

    pub fn spotify_id(&self) -> Option<&str> {
        self.spotify_id.as_deref()
    }

    pub fn expanded_from(&self) -> ExpandedFrom {
        self.expanded_from
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn local_path(&self) -> Option<&PathBuf> {
        self.local_path.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn retry_after(&self) -> Option<i64> {
        self.retry_after
    }

    pub fn download_attempts(&self) -> u32 {
        self.download_attempts
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    pub fn mark_downloaded(&mut self, local_path: PathBuf, now: i64) {
        self.status = TrackStatus::Downloaded;
        self.local_path = Some(local_path);
        self.last_error = None;
        self.retry_after = None;
        self.download_attempts = 0;
        self.last_seen = now;
    }

    pub fn mark_missing(&mut self, reason: impl Into<String>, retry_after: i64) {
        self.status = TrackStatus::Missing;
        self.last_error = Some(reason.into());
        self.retry_after = Some(retry_after);
        self.download_attempts += 1;
    }

    pub fn reset_for_retry(&mut self) {
        self.status = TrackStatus::Pending;
        self.last_error = None;
        self.retry_after = None;
        self.download_attempts = 0;
    }

    pub fn touch_seen(&mut self, now: i64) {
        self.last_seen = now;
    }
}
