pub mod track;
pub mod queue_item;

use serde::{Deserialize, Serialize};
use thiserror;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Artist field cannot be an empty string.")]
    ArtistIsEmptyString,

    #[error("Title field cannot be an empty string.")]
    TitleIsEmptyString,

    #[error("Duration cannot be zero.")]
    DurationIsZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpandedFrom {
    Playlist,
    Artist,
    Album,
}

impl ExpandedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpandedFrom::Playlist => "playlist",
            ExpandedFrom::Artist => "artist",
            ExpandedFrom::Album => "album",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid 'expanded_from' value: '{0}'. Expected 'playlist', 'artist' or 'album'.")]
pub struct ExpandedFromParseError(String);

impl TryFrom<&str> for ExpandedFrom {
    type Error = ExpandedFromParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "playlist" => Ok(ExpandedFrom::Playlist),
            "artist" => Ok(ExpandedFrom::Artist),
            "album" => Ok(ExpandedFrom::Album),
            other => Err(ExpandedFromParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    Pending,
    Downloaded,
    Missing,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Downloaded => "downloaded",
            TrackStatus::Missing => "missing",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid 'status' value: '{0}'. Expected 'pending', 'downloaded' or 'missing'.")]
pub struct TrackStatusParseError(String);

impl TryFrom<&str> for TrackStatus {
    type Error = TrackStatusParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(TrackStatus::Pending),
            "downloaded" => Ok(TrackStatus::Downloaded),
            "missing" => Ok(TrackStatus::Missing),
            other => Err(TrackStatusParseError(other.to_string())),
        }
    }
}
