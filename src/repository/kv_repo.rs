use sqlx::{Executor, Sqlite};

use super::RepositoryError;

/// A thin key-value store used for the small bits of daemon state that don't
/// warrant their own table: the queue snapshot, the catalog version watermark
/// and the persisted runtime config.
pub struct SqliteKvRepository;

impl Default for SqliteKvRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteKvRepository {
    pub fn new() -> Self {
        Self {}
    }

    pub async fn get<'e, E>(&self, executor: E, key: &str) -> Result<Option<String>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?;")
            .bind(key)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(value)
    }

    pub async fn set<'e, E>(&self, executor: E, key: &str, value: &str) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO kv_store(key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        )
        .bind(key)
        .bind(value)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn delete<'e, E>(&self, executor: E, key: &str) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM kv_store WHERE key = ?;")
            .bind(key)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}
