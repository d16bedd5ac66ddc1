//! Orchestrator process: runs the crawl feeder's promotion loop and the
//! orphan watchdog's reconciliation sweep side by side. Both are idle-safe
//! to run from more than one process — the feeder defers to a leader lock,
//! the watchdog's phases are all idempotent CAS writes — so this binary can
//! be scaled horizontally for availability without any app-level
//! coordination beyond what each component already does.

use std::sync::Arc;

use meridian_capacity::CapacityManager;
use meridian_core::{keys, MeridianSettings};
use meridian_feeder::{CrawlFeeder, FeederConfig, RedisLeaderLock};
use meridian_jobs::JobRepository;
use meridian_watchdog::{OrphanWatchdog, WatchdogConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = MeridianSettings::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await?;

    let capacity = Arc::new(CapacityManager::new(
        &settings.redis_url,
        settings.crawl_default_max_concurrent,
        settings.crawl_slot_ttl,
    )?);

    let leader = Arc::new(RedisLeaderLock::new(
        &settings.redis_url,
        keys::feeder_leader_key(),
    )?);

    let jobs = JobRepository::new(pool.clone());
    let feeder = CrawlFeeder::new(
        jobs,
        capacity.clone(),
        leader,
        FeederConfig {
            poll_interval: settings.feeder_poll_interval,
            leader_lock_ttl: settings.feeder_poll_interval * 3,
        },
    );

    let watchdog = OrphanWatchdog::new(
        pool,
        capacity,
        WatchdogConfig {
            crawl_job_max_age: settings.crawl_job_max_age,
            startup_timeout: settings.watchdog_startup_timeout,
            long_running_threshold: settings.watchdog_long_running_threshold,
        },
    );

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    let feeder_task = tokio::spawn(async move { feeder.run(cancel_rx).await });
    let watchdog_interval = settings.watchdog_interval;
    let watchdog_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(watchdog_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = watchdog.run_cleanup().await {
                tracing::error!(error = %err, "watchdog sweep failed");
            }
        }
    });

    tracing::info!("meridian-server started");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping feeder");
    cancel_tx.send(true).ok();
    watchdog_task.abort();
    feeder_task.await.ok();

    Ok(())
}
