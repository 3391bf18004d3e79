use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use parcel_cost::pipeline::DeliveryCostJob;
use parcel_cost::{cache, config, db};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Price all unprocessed packages once and exit"
)]
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

    let store = cache::store_from_config(&cfg.cache)?;
    let job = DeliveryCostJob::from_config(&cfg, pool.clone(), store);

    info!("starting one-shot delivery cost run");
    let report = job.process().await.context("delivery cost run failed")?;
    info!(
        scanned = report.scanned,
        written = report.written,
        "delivery cost run completed"
    );

    pool.close().await;
    Ok(())
}
