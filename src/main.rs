use anyhow::{Context, Result};
use clap::Parser;
use parcel_cost::health::HealthChecker;
use parcel_cost::pipeline::{DeliveryCostJob, SessionCleanupJob};
use parcel_cost::scheduler::Scheduler;
use parcel_cost::{cache, config, db};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Price shipped packages in the background")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let seeded = db::seed_package_types(&pool).await?;
    if seeded > 0 {
        info!(seeded, "seeded package types");
    }

    let store = cache::store_from_config(&cfg.cache)?;
    let health = HealthChecker::new().report(&pool, store.as_ref()).await;
    if health.is_healthy() {
        info!(?health, "startup health check passed");
    } else {
        // Pricing still works without the cache.
        warn!(?health, "startup health check reported problems");
    }

    let pricing = Scheduler::new(
        Arc::new(DeliveryCostJob::from_config(&cfg, pool.clone(), store)),
        cfg.pipeline.interval(),
    );
    let cleanup = Scheduler::new(
        Arc::new(SessionCleanupJob::new(
            pool.clone(),
            cfg.pipeline.session_max_idle_days,
        )),
        cfg.pipeline.session_cleanup_interval(),
    );

    pricing.start().await;
    cleanup.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    pricing.stop().await;
    cleanup.stop().await;
    pool.close().await;
    Ok(())
}
