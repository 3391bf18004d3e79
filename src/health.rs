//! Liveness probes for the database and the rate cache.
use serde::Serialize;
use std::time::Instant;

use crate::cache::CacheStore;
use crate::db::Pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub response_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub version: &'static str,
    pub uptime: f64,
    pub database: ProbeResult,
    pub cache: ProbeResult,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database.status == ProbeStatus::Ok && self.cache.status == ProbeStatus::Ok
    }
}

pub struct HealthChecker {
    started: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub async fn check_database(&self, pool: &Pool) -> ProbeResult {
        let start = Instant::now();
        let res = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await;
        probe(start, res.map(|_| ()).map_err(|e| e.to_string()))
    }

    pub async fn check_cache(&self, cache: &dyn CacheStore) -> ProbeResult {
        let start = Instant::now();
        let res = cache.ping().await;
        probe(start, res.map_err(|e| e.to_string()))
    }

    pub async fn report(&self, pool: &Pool, cache: &dyn CacheStore) -> HealthReport {
        HealthReport {
            version: env!("CARGO_PKG_VERSION"),
            uptime: self.started.elapsed().as_secs_f64(),
            database: self.check_database(pool).await,
            cache: self.check_cache(cache).await,
        }
    }
}

fn probe(start: Instant, res: Result<(), String>) -> ProbeResult {
    let response_time = start.elapsed().as_secs_f64();
    match res {
        Ok(()) => ProbeResult {
            status: ProbeStatus::Ok,
            response_time,
            error: None,
        },
        Err(error) => ProbeResult {
            status: ProbeStatus::Error,
            response_time,
            error: Some(error),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::db;

    #[tokio::test]
    async fn healthy_with_memory_backends() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        let checker = HealthChecker::new();
        let report = checker.report(&pool, &MemoryCacheStore::new()).await;
        assert!(report.is_healthy());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["database"]["status"], "ok");
        assert!(json["cache"].get("error").is_none());
    }

    #[tokio::test]
    async fn closed_pool_is_reported() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        pool.close().await;
        let report = HealthChecker::new()
            .report(&pool, &MemoryCacheStore::new())
            .await;
        assert_eq!(report.database.status, ProbeStatus::Error);
        assert!(report.database.error.is_some());
        assert!(!report.is_healthy());
    }
}
