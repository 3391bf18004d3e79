use super::repo::{self, Pool};
use crate::error::StorageError;
use crate::model::PackageRecord;
use async_trait::async_trait;

/// Read side of package storage used by the pipeline.
#[async_trait]
pub trait PackageReader: Send + Sync {
    /// Every record whose delivery cost is still unset. Not paginated.
    async fn list_unprocessed(&self) -> Result<Vec<PackageRecord>, StorageError>;
}

/// Write side of package storage used by the pipeline.
#[async_trait]
pub trait PackageWriter: Send + Sync {
    /// Persist the in-memory delivery costs of `records` atomically.
    /// An empty slice must not open a transaction.
    async fn bulk_persist(&self, records: &[PackageRecord]) -> Result<u64, StorageError>;
}

/// SQLite-backed store implementing both capabilities over a shared pool.
#[derive(Debug, Clone)]
pub struct SqlitePackageStore {
    pool: Pool,
}

impl SqlitePackageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageReader for SqlitePackageStore {
    async fn list_unprocessed(&self) -> Result<Vec<PackageRecord>, StorageError> {
        repo::list_unprocessed(&self.pool).await
    }
}

#[async_trait]
impl PackageWriter for SqlitePackageStore {
    async fn bulk_persist(&self, records: &[PackageRecord]) -> Result<u64, StorageError> {
        repo::bulk_persist(&self.pool, records).await
    }
}
