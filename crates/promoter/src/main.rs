//! Standalone delayed-job promoter.
//!
//! Moves ready jobs from each configured queue's delayed set into the live
//! queue until interrupted with Ctrl-C.

mod settings;

use std::sync::Arc;

use anyhow::Context;
use skein_queue::{DelayedPromoter, JobQueue};
use skein_store::RedisStore;

use crate::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    skein_observability::init();

    let settings = Settings::from_env().context("invalid promoter configuration")?;
    tracing::info!(
        queues = ?settings.queues,
        interval_ms = settings.interval.as_millis() as u64,
        "starting delayed promoter"
    );

    // Connecting retries with pauses; keep it off the async workers.
    let store_config = settings.store.clone();
    let store = tokio::task::spawn_blocking(move || RedisStore::connect(store_config))
        .await?
        .context("failed to connect to store")?;

    let queue = JobQueue::new(Arc::new(store));
    let handle = DelayedPromoter::new(queue)
        .spawn(settings.promoter())
        .context("failed to start promoter")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    let stats = tokio::task::spawn_blocking(move || handle.shutdown()).await?;

    tracing::info!(
        rounds = stats.rounds,
        jobs_promoted = stats.jobs_promoted,
        failures = stats.failures,
        uptime_secs = stats.uptime_secs,
        "delayed promoter stopped"
    );
    Ok(())
}
