//! Scheduled jobs: delivery-cost pricing and session cleanup.
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::cache::{CacheStore, RateCache};
use crate::calculator::DeliveryCostCalculator;
use crate::config::Config;
use crate::db::{self, PackageReader, PackageWriter, Pool, SqlitePackageStore};
use crate::error::PipelineError;
use crate::rates::HttpRateProviderFactory;
use crate::scheduler::Job;

/// Outcome of one pricing tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scanned: usize,
    pub written: u64,
}

/// Scan unprocessed packages, price them with one rate lookup and write the
/// costs back in one transaction.
pub struct DeliveryCostJob {
    reader: Arc<dyn PackageReader>,
    writer: Arc<dyn PackageWriter>,
    calculator: DeliveryCostCalculator,
}

impl DeliveryCostJob {
    pub fn new(
        reader: Arc<dyn PackageReader>,
        writer: Arc<dyn PackageWriter>,
        calculator: DeliveryCostCalculator,
    ) -> Self {
        Self {
            reader,
            writer,
            calculator,
        }
    }

    /// Wire the SQLite store, the configured rate cache and the HTTP rate
    /// provider together.
    pub fn from_config(cfg: &Config, pool: Pool, store: Arc<dyn CacheStore>) -> Self {
        let packages = Arc::new(SqlitePackageStore::new(pool));
        let cache = RateCache::new(store, cfg.cache.key.clone(), cfg.cache.ttl());
        let rates = Arc::new(HttpRateProviderFactory::new(cfg.rates.clone()));
        Self::new(
            packages.clone(),
            packages,
            DeliveryCostCalculator::new(cache, rates),
        )
    }

    #[instrument(skip_all)]
    pub async fn process(&self) -> Result<TickReport, PipelineError> {
        let mut packages = self.reader.list_unprocessed().await?;
        if packages.is_empty() {
            info!("no unprocessed packages found");
            return Ok(TickReport::default());
        }

        self.calculator.process_batch(&mut packages).await?;
        let written = self.writer.bulk_persist(&packages).await?;

        info!(scanned = packages.len(), written, "delivery costs persisted");
        Ok(TickReport {
            scanned: packages.len(),
            written,
        })
    }
}

#[async_trait]
impl Job for DeliveryCostJob {
    fn name(&self) -> &'static str {
        "delivery_cost"
    }

    async fn run_once(&self) -> Result<()> {
        self.process().await?;
        Ok(())
    }
}

/// Delete user sessions idle for longer than `max_idle_days`.
pub struct SessionCleanupJob {
    pool: Pool,
    max_idle_days: u32,
}

impl SessionCleanupJob {
    pub fn new(pool: Pool, max_idle_days: u32) -> Self {
        Self {
            pool,
            max_idle_days,
        }
    }
}

#[async_trait]
impl Job for SessionCleanupJob {
    fn name(&self) -> &'static str {
        "session_cleanup"
    }

    async fn run_once(&self) -> Result<()> {
        let removed = db::delete_inactive_sessions(&self.pool, Utc::now(), self.max_idle_days).await?;
        info!(removed, max_idle_days = self.max_idle_days, "inactive sessions cleaned up");
        Ok(())
    }
}
