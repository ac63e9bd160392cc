use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Error};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if necessary) the sqlite file at `database_path` and runs
    /// pending migrations. This is the daemon's own first-run bootstrap, so unlike
    /// a request served once the pool exists, it is allowed to fail loudly via `anyhow`.
    pub async fn init_application_db(database_path: &Path) -> Result<Self, Error> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create database directory {:?}", parent))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path.display()))
            .with_context(|| format!("invalid database path {:?}", database_path))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open database pool")?;

        let db = Database { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), Error> {
        let migrations = Migrator::new(Path::new("./migrations"))
            .await
            .context("failed to load migrations directory")?;
        migrations.run(&self.pool).await.context("failed to run migrations")?;

        Ok(())
    }
}
