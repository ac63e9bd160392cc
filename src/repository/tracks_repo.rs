use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use sqlx::{Executor, FromRow, QueryBuilder, Sqlite};

use crate::domain::{ExpandedFrom, ExpandedFromParseError, TrackStatus, TrackStatusParseError};
use crate::domain::track::Track;
use crate::services::matcher::normalize;
use super::RepositoryError;

#[derive(FromRow)]
struct DbTrack {
    identity: String,
    artist: String,
    title: String,
    album: Option<String>,
    duration: i64,
    playlist_id: Option<String>,
    spotify_id: Option<String>,
    expanded_from: String,
    status: String,
    local_path: Option<String>,
    last_error: Option<String>,
    retry_after: Option<i64>,
    download_attempts: i64,
    last_seen: i64,
}

impl TryFrom<DbTrack> for Track {
    type Error = TrackConversionError;

    fn try_from(row: DbTrack) -> Result<Self, Self::Error> {
        Ok(Track::from_parts(
            row.identity,
            row.artist,
            row.title,
            row.album,
            u32::try_from(row.duration)?,
            row.playlist_id,
            row.spotify_id,
            ExpandedFrom::try_from(row.expanded_from.as_str())?,
            TrackStatus::try_from(row.status.as_str())?,
            row.local_path.map(PathBuf::from),
            row.last_error,
            row.retry_after,
            u32::try_from(row.download_attempts)?,
            row.last_seen,
        )?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackConversionError {
    #[error("Integer conversion error: {0}")]
    IntConversionError(#[from] std::num::TryFromIntError),

    #[error("Invalid 'expanded_from' stored in database: {0}")]
    ExpandedFromError(#[from] ExpandedFromParseError),

    #[error("Invalid 'status' stored in database: {0}")]
    StatusError(#[from] TrackStatusParseError),

    #[error("Error during validation of track fields: {0}")]
    ValidationError(#[from] crate::domain::ValidationError),
}

const TRACK_COLUMNS: &str = "identity, artist, title, album, duration, playlist_id, spotify_id, \
    expanded_from, status, local_path, last_error, retry_after, download_attempts, last_seen";

pub struct SqliteTracksRepository;

impl Default for SqliteTracksRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteTracksRepository {
    pub fn new() -> Self {
        Self {}
    }

    /// Inserts tracks that are not yet known, or refreshes `last_seen` for ones that are,
    /// leaving download progress (status, local_path, retry_after, ...) untouched.
    /// Advances the `catalog_version` watermark in `kv_store` exactly once per batch,
    /// in the same transaction as the row upserts, per the data model's version-token
    /// invariant — a caller reading `catalog_version` never observes it bumped without
    /// the corresponding rows already being commit-visible.
    pub async fn upsert_tracks(&self, pool: &sqlx::SqlitePool, tracks: &[Track]) -> Result<(), RepositoryError> {
        if tracks.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await.map_err(RepositoryError::from_sqlx_error)?;

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO tracks({TRACK_COLUMNS}) "
        ));

        qbuilder.push_values(tracks.iter(), |mut b, track| {
            b.push_bind(track.identity().to_string())
                .push_bind(track.artist().to_string())
                .push_bind(track.title().to_string())
                .push_bind(track.album().map(str::to_string))
                .push_bind(track.duration() as i64)
                .push_bind(track.playlist_id().map(str::to_string))
                .push_bind(track.spotify_id().map(str::to_string))
                .push_bind(track.expanded_from().as_str())
                .push_bind(track.status().as_str())
                .push_bind(track.local_path().map(|p| p.to_string_lossy().to_string()))
                .push_bind(track.last_error().map(str::to_string))
                .push_bind(track.retry_after())
                .push_bind(track.download_attempts() as i64)
                .push_bind(track.last_seen());
        });

        qbuilder.push(
            " ON CONFLICT(identity) DO UPDATE SET last_seen = excluded.last_seen, \
              playlist_id = COALESCE(excluded.playlist_id, tracks.playlist_id), \
              spotify_id = COALESCE(excluded.spotify_id, tracks.spotify_id);",
        );

        qbuilder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        sqlx::query(
            "INSERT INTO kv_store(key, value) VALUES ('catalog_version', '1') \
             ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT);",
        )
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        tx.commit().await.map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn by_identity_fetch<'e, E>(&self, executor: E, identity: &str) -> Result<Option<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbTrack>(&format!(
            "SELECT {TRACK_COLUMNS} FROM tracks WHERE identity = ? LIMIT 1;"
        ))
        .bind(identity)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        row.map(Track::try_from)
            .transpose()
            .map_err(RepositoryError::TrackDataMapping)
    }

    pub async fn all<'e, E>(&self, executor: E) -> Result<Vec<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTrack>(&format!("SELECT {TRACK_COLUMNS} FROM tracks;"))
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(Track::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(RepositoryError::TrackDataMapping)
    }

    /// All known identities, for diffing against what the disk scan and the playlist
    /// snapshot actually found during reconciliation.
    pub async fn all_identities<'e, E>(&self, executor: E) -> Result<HashSet<String>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let ids: Vec<String> = sqlx::query_scalar("SELECT identity FROM tracks;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(ids.into_iter().collect())
    }

    /// Tracks eligible for the download queue: pending, and either never attempted
    /// or past their backoff `retry_after` horizon.
    pub async fn select_for_queue<'e, E>(&self, executor: E, now: i64) -> Result<Vec<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTrack>(&format!(
            "SELECT {TRACK_COLUMNS} FROM tracks \
             WHERE status != 'downloaded' AND (retry_after IS NULL OR retry_after <= ?) \
             ORDER BY last_seen ASC;"
        ))
        .bind(now)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(Track::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(RepositoryError::TrackDataMapping)
    }

    pub async fn mark_downloaded<'e, E>(
        &self,
        executor: E,
        identity: &str,
        local_path: &str,
        now: i64,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE tracks SET status = 'downloaded', local_path = ?, last_error = NULL, \
             retry_after = NULL, download_attempts = 0, last_seen = ? WHERE identity = ?;",
        )
        .bind(local_path)
        .bind(now)
        .bind(identity)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn mark_missing<'e, E>(
        &self,
        executor: E,
        identity: &str,
        reason: &str,
        retry_after: i64,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE tracks SET status = 'missing', last_error = ?, retry_after = ?, \
             download_attempts = download_attempts + 1 WHERE identity = ?;",
        )
        .bind(reason)
        .bind(retry_after)
        .bind(identity)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn reset_for_retry<'e, E>(&self, executor: E, identity: &str) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE tracks SET status = 'pending', last_error = NULL, retry_after = NULL, \
             download_attempts = 0 WHERE identity = ?;",
        )
        .bind(identity)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Resets every track currently in `missing` state back to `pending`, dropping
    /// its backoff horizon so the next sync cycle retries it immediately.
    pub async fn reset_all_errors<'e, E>(&self, executor: E) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE tracks SET status = 'pending', last_error = NULL, retry_after = NULL, \
             download_attempts = 0 WHERE status = 'missing';",
        )
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    pub async fn delete_by_identity<'e, E>(&self, executor: E, identity: &str) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM tracks WHERE identity = ?;")
            .bind(identity)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn counts_by_status<'e, E>(&self, executor: E) -> Result<TrackCounts, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tracks GROUP BY status;")
                .fetch_all(executor)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;

        let mut counts = TrackCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count as u64,
                "downloaded" => counts.downloaded = count as u64,
                "missing" => counts.missing = count as u64,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Aggregate counters for `/status`: total rows, distinct artists, distinct
    /// non-empty albums, and the per-status breakdown.
    pub async fn counts<'e, E>(&self, executor: E) -> Result<CatalogCounts, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (songs, artists, albums): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT artist), \
             COUNT(DISTINCT CASE WHEN album IS NOT NULL AND album != '' THEN album END) \
             FROM tracks;",
        )
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(CatalogCounts {
            songs: songs as u64,
            artists: artists as u64,
            albums: albums as u64,
        })
    }

    /// The only component allowed to move rows between `downloaded` and `missing`:
    /// every row's `status` is forced to match whether `local_path` is present in
    /// `disk_paths` (the result of a prior recursive walk of the music root). A
    /// never-downloaded row (no recorded `local_path`) additionally matches
    /// against `disk_identity_index` — the normalised `(artist, title)` pairs of
    /// every disk file that matches the path template — so a file placed on disk
    /// by hand or migrated from another library is recognised too. Returns how
    /// many rows were upgraded to `downloaded` and how many were downgraded to
    /// `missing`.
    pub async fn reconcile_against_disk<'e, E>(
        &self,
        executor: E,
        disk_paths: &HashSet<PathBuf>,
        disk_identity_index: &HashMap<(String, String), PathBuf>,
        now: i64,
    ) -> Result<ReconcileOutcome, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite> + Copy,
    {
        let rows = self.all(executor).await?;
        let mut outcome = ReconcileOutcome::default();

        for row in rows {
            let exists = match row.local_path() {
                Some(path) => disk_paths.contains(path),
                None => false,
            };

            match (row.status(), exists) {
                (TrackStatus::Downloaded, false) => {
                    sqlx::query(
                        "UPDATE tracks SET status = 'missing', retry_after = NULL WHERE identity = ?;",
                    )
                    .bind(row.identity())
                    .execute(executor)
                    .await
                    .map_err(RepositoryError::from_sqlx_error)?;
                    outcome.downgraded_to_missing += 1;
                }
                (status, true) if status != TrackStatus::Downloaded => {
                    let local_path = row.local_path().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
                    self.mark_downloaded(executor, row.identity(), &local_path, now).await?;
                    outcome.upgraded_to_downloaded += 1;
                }
                (status, false) if status != TrackStatus::Downloaded && row.local_path().is_none() => {
                    let key = (normalize(row.artist()), normalize(row.title()));
                    if let Some(path) = disk_identity_index.get(&key) {
                        let local_path = path.to_string_lossy().to_string();
                        self.mark_downloaded(executor, row.identity(), &local_path, now).await?;
                        outcome.upgraded_to_downloaded += 1;
                    }
                }
                _ => {}
            }
        }

        Ok(outcome)
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TrackCounts {
    pub pending: u64,
    pub downloaded: u64,
    pub missing: u64,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CatalogCounts {
    pub songs: u64,
    pub artists: u64,
    pub albums: u64,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub upgraded_to_downloaded: u64,
    pub downgraded_to_missing: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::track::NewTrack;
    use crate::repository::test_helpers::prepare_db;

    fn sample(identity: &str, last_seen: i64) -> Track {
        Track::new(NewTrack {
            identity: identity.to_string(),
            artist: "Boards of Canada".to_string(),
            title: "Roygbiv".to_string(),
            album: Some("Music Has the Right to Children".to_string()),
            duration: 252,
            playlist_id: Some("pl1".to_string()),
            spotify_id: None,
            expanded_from: ExpandedFrom::Playlist,
            last_seen,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_then_fetch_roundtrips() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let track = sample("boards of canada roygbiv", 1000);

        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();

        let fetched = repo
            .by_identity_fetch(&pool, "boards of canada roygbiv")
            .await
            .unwrap()
            .expect("track should exist");

        assert_eq!(fetched.identity(), track.identity());
        assert_eq!(fetched.status(), TrackStatus::Pending);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_preserves_progress() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let track = sample("boards of canada roygbiv", 1000);

        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();
        repo.mark_downloaded(&pool, track.identity(), "/music/roygbiv.mp3", 2000)
            .await
            .unwrap();

        // Re-seen on the next sync cycle with a later last_seen.
        let reseen = sample("boards of canada roygbiv", 3000);
        repo.upsert_tracks(&pool, &[reseen]).await.unwrap();

        let fetched = repo
            .by_identity_fetch(&pool, "boards of canada roygbiv")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched.status(), TrackStatus::Downloaded);
        assert_eq!(fetched.last_seen(), 3000);
    }

    #[tokio::test]
    async fn select_for_queue_respects_retry_after() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let track = sample("air talisman", 1000);
        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();
        repo.mark_missing(&pool, track.identity(), "no match found", 5000)
            .await
            .unwrap();

        let before = repo.select_for_queue(&pool, 2000).await.unwrap();
        assert!(before.is_empty());

        let after = repo.select_for_queue(&pool, 6000).await.unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn reset_all_errors_clears_missing_tracks() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let track = sample("air talisman", 1000);
        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();
        repo.mark_missing(&pool, track.identity(), "no match found", 5000)
            .await
            .unwrap();

        let affected = repo.reset_all_errors(&pool).await.unwrap();
        assert_eq!(affected, 1);

        let fetched = repo.by_identity_fetch(&pool, track.identity()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TrackStatus::Pending);
        assert!(fetched.retry_after().is_none());
    }

    #[tokio::test]
    async fn counts_by_status_tallies_each_bucket() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        repo.upsert_tracks(&pool, &[sample("a", 1), sample("b", 2)])
            .await
            .unwrap();
        repo.mark_downloaded(&pool, "a", "/music/a.mp3", 10).await.unwrap();

        let counts = repo.counts_by_status(&pool).await.unwrap();
        assert_eq!(counts.downloaded, 1);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn counts_tallies_distinct_artists_and_albums() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        repo.upsert_tracks(&pool, &[sample("a", 1), sample("b", 2)]).await.unwrap();

        let counts = repo.counts(&pool).await.unwrap();
        assert_eq!(counts.songs, 2);
        assert_eq!(counts.artists, 1);
        assert_eq!(counts.albums, 1);
    }

    #[tokio::test]
    async fn reconcile_downgrades_downloaded_row_whose_file_is_gone() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("roygbiv.mp3");
        std::fs::write(&file_path, b"noop").unwrap();

        let track = sample("boards of canada roygbiv", 1000);
        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();
        repo.mark_downloaded(&pool, track.identity(), &file_path.to_string_lossy(), 2000).await.unwrap();

        std::fs::remove_file(&file_path).unwrap();
        let disk_paths = crate::services::path_template::scan_music_root(dir.path());

        let outcome = repo.reconcile_against_disk(&pool, &disk_paths, &HashMap::new(), 3000).await.unwrap();
        assert_eq!(outcome.downgraded_to_missing, 1);
        assert_eq!(outcome.upgraded_to_downloaded, 0);

        let fetched = repo.by_identity_fetch(&pool, track.identity()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TrackStatus::Missing);
        assert_eq!(fetched.download_attempts(), 0);
    }

    #[tokio::test]
    async fn reconcile_upgrades_a_row_whose_file_reappeared_on_disk() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("roygbiv.mp3");

        let track = sample("boards of canada roygbiv", 1000);
        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();
        repo.mark_missing(&pool, track.identity(), "no match found", 5000).await.unwrap();

        // A human drops the file back in place by hand; the row's local_path was
        // never set on this identity before, so reconciliation has nothing to key
        // off until a download records one. Simulate that by writing the path the
        // worker would have recorded on a prior success.
        std::fs::write(&file_path, b"noop").unwrap();
        sqlx::query("UPDATE tracks SET local_path = ? WHERE identity = ?;")
            .bind(file_path.to_string_lossy().to_string())
            .bind(track.identity())
            .execute(&pool)
            .await
            .unwrap();

        let disk_paths = crate::services::path_template::scan_music_root(dir.path());
        let outcome = repo.reconcile_against_disk(&pool, &disk_paths, &HashMap::new(), 6000).await.unwrap();
        assert_eq!(outcome.upgraded_to_downloaded, 1);
        assert_eq!(outcome.downgraded_to_missing, 0);

        let fetched = repo.by_identity_fetch(&pool, track.identity()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TrackStatus::Downloaded);
        assert!(fetched.retry_after().is_none());
    }

    #[tokio::test]
    async fn reconcile_upgrades_a_never_downloaded_row_found_by_template_match() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Boards of Canada")).unwrap();
        let file_path = dir.path().join("Boards of Canada").join("Roygbiv.mp3");
        std::fs::write(&file_path, b"noop").unwrap();

        // Never downloaded by this daemon: no local_path recorded at all.
        let track = sample("boards of canada roygbiv", 1000);
        repo.upsert_tracks(&pool, &[track.clone()]).await.unwrap();

        let disk_paths = crate::services::path_template::scan_music_root(dir.path());
        let disk_index =
            crate::services::path_template::index_disk_by_identity(dir.path(), "{artist}/{title}.{ext}");
        let outcome = repo.reconcile_against_disk(&pool, &disk_paths, &disk_index, 6000).await.unwrap();
        assert_eq!(outcome.upgraded_to_downloaded, 1);

        let fetched = repo.by_identity_fetch(&pool, track.identity()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TrackStatus::Downloaded);
        assert_eq!(fetched.local_path(), Some(&file_path));
    }

    #[tokio::test]
    async fn reconcile_is_the_only_path_between_downloaded_and_missing() {
        let pool = prepare_db().await.unwrap();
        let repo = SqliteTracksRepository::new();

        let outcome = repo.reconcile_against_disk(&pool, &HashSet::new(), &HashMap::new(), 1).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::default());
    }
}
