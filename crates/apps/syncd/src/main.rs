//! syncd - background mail sync worker
//!
//! Runs the worker pool that executes account sync tasks and a scheduler
//! that fans out a sync-all task on a fixed interval. Stops on Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use mailsync::jobs::{
    GmailConnector, JobQueue, PoolConfig, Scheduler, SyncHandlers, Task, TaskError, WorkerPool,
};
use mailsync::{
    AesGcmCipher, GoogleTokenEndpoint, KeyProvider, OAuthCredentials, SqliteMailStore, SyncConfig,
    WorkerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config::env_or("LOG_LEVEL", "info")),
    )
    .format_timestamp_millis()
    .init();

    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let worker_config = WorkerConfig::from_env();
    let sync_config = SyncConfig::from_env();

    // Missing credentials or key are fatal before any sync begins
    let credentials = OAuthCredentials::load().context("Failed to load OAuth credentials")?;
    let keys =
        KeyProvider::from_env(worker_config.production).context("Failed to load encryption key")?;
    if keys.is_ephemeral() {
        warn!("Using an ephemeral encryption key; stored tokens will not survive a restart");
    }

    let db_path = worker_config
        .resolved_database_path()
        .context("No database path configured and no data directory available")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteMailStore::new(&db_path)?);
    info!("Database opened at {}", db_path.display());

    let cipher = Arc::new(AesGcmCipher::from_provider(&keys));
    let endpoint = Arc::new(GoogleTokenEndpoint::new(credentials));
    let connector = Arc::new(GmailConnector::new(cipher, endpoint, store.clone()));

    let queue = Arc::new(JobQueue::new());
    let handlers = Arc::new(SyncHandlers::new(
        store,
        queue.clone(),
        connector,
        sync_config,
    ));

    let pool = WorkerPool::start(
        queue.clone(),
        handlers,
        PoolConfig {
            concurrency: worker_config.concurrency,
            on_error: Some(Arc::new(|task_type: &str, err: &TaskError| {
                error!("Task {} failed: {}", task_type, err);
            })),
        },
    )
    .context("Failed to start worker pool")?;

    let fan_out = Task::sync_all(worker_config.max_accounts);
    if let Err(e) = queue.enqueue(&fan_out) {
        warn!("Failed to enqueue initial fan-out: {}", e);
    }

    let mut scheduler = Scheduler::new(queue.clone());
    scheduler.register(fan_out, worker_config.sync_interval);
    scheduler.start().context("Failed to start scheduler")?;

    info!(
        "syncd running: {} workers, fan-out every {:?}",
        worker_config.concurrency, worker_config.sync_interval
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    scheduler.shutdown();
    // Joining workers blocks until running tasks finish
    tokio::task::spawn_blocking(move || pool.shutdown())
        .await
        .context("Worker pool shutdown panicked")?;
    info!("syncd stopped");
    Ok(())
}
