use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use sync_orchestrator::cli::{Cli, Command};
use sync_orchestrator::repository::SqliteKvRepository;
use sync_orchestrator::services::orchestrator::Orchestrator;
use sync_orchestrator::services::providers::{UnconfiguredExtractor, UnconfiguredPlaylistProvider, UnconfiguredSearchClient};
use sync_orchestrator::utils::config::Config;
use sync_orchestrator::utils::db::Database;
use sync_orchestrator::web::{routes::create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::ValidateConfig => {
            let config = Config::load(&cli.config).context("config failed to validate")?;
            log::info!("config at {} is valid (host_path={})", cli.config, config.host_path.display());
            Ok(())
        }
        Command::Run => run(&cli.config).await,
    }
}

async fn run(config_path: &str) -> anyhow::Result<()> {
    let file_config = Config::load(config_path).context("failed to load config")?;

    let db = Database::init_application_db(&file_config.database_path)
        .await
        .context("failed to initialise database")?;
    let pool = db.get_pool().clone();

    let config = load_effective_config(&pool, &file_config, config_path).await;

    let provider = Arc::new(UnconfiguredPlaylistProvider);
    let search = Arc::new(UnconfiguredSearchClient);
    let extractor = Arc::new(UnconfiguredExtractor);

    let bind_addr = config.server_bind_addr.clone();

    let orchestrator = Arc::new(Orchestrator::new(pool, config_path.to_string(), config, provider, search, extractor, None));
    orchestrator.recover_from_snapshot().await;
    orchestrator.start_watchdog().await;

    let scheduler_handle = orchestrator.spawn_scheduler();
    let worker_handle = orchestrator.spawn_worker();

    let app = create_router(AppState { orchestrator: orchestrator.clone() });
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind control surface to {bind_addr}"))?;
    log::info!("control surface listening on {bind_addr}");

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                log::error!("http server exited with error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
    }

    orchestrator.request_shutdown();
    orchestrator.stop_watchdog().await;
    let _ = scheduler_handle.await;
    let _ = worker_handle.await;

    let snapshot = orchestrator.queue_snapshot().await;
    if let Err(err) = sync_orchestrator::services::sync::save_snapshot(&orchestrator.pool, &snapshot).await {
        log::error!("failed to flush queue snapshot on shutdown: {err}");
    }

    Ok(())
}

/// Config precedence at start-up: the `config` row in `kv_store` wins over the
/// TOML file whenever it parses, so a previous `/config` POST survives a
/// restart without needing the file rewritten in lockstep. Falls back to the
/// file (and seeds the row) on first run or if the stored value is corrupt.
async fn load_effective_config(pool: &sqlx::SqlitePool, file_config: &Config, config_path: &str) -> Config {
    let kv = SqliteKvRepository::new();

    match kv.get(pool, "config").await {
        Ok(Some(stored)) => match toml::from_str::<Config>(&stored) {
            Ok(config) if config.validate().is_ok() => {
                log::info!("using config persisted in the database over {config_path}");
                config
            }
            _ => {
                log::warn!("stored config at key 'config' failed to parse or validate, falling back to {config_path}");
                file_config.clone()
            }
        },
        Ok(None) => {
            if let Ok(serialized) = file_config.to_toml_string() {
                let _ = kv.set(pool, "config", &serialized).await;
            }
            file_config.clone()
        }
        Err(err) => {
            log::warn!("failed to read persisted config, falling back to {config_path}: {err}");
            file_config.clone()
        }
    }
}
