//! Session-scoped package operations used by request handlers.
use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::{self, NewPackage, PackageUpdate, Pool};
use crate::error::StorageError;
use crate::model::{PackageRecord, PackageType, PackageView};

pub const DEFAULT_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct PackageService {
    pool: Pool,
}

impl PackageService {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Resolve the caller's session: reuse `session_id` when given (creating
    /// the row on first sight), otherwise mint a new one. Always bumps
    /// `last_activity`.
    #[instrument(skip_all)]
    pub async fn ensure_session(&self, session_id: Option<&str>) -> Result<String, StorageError> {
        let session_id = match session_id.filter(|s| !s.trim().is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        if db::create_session(&self.pool, &session_id).await? {
            debug!(%session_id, "created user session");
        }
        db::touch_session(&self.pool, &session_id, Utc::now()).await?;
        Ok(session_id)
    }

    pub async fn create_package(
        &self,
        user_session: &str,
        input: &NewPackage,
    ) -> Result<PackageRecord, StorageError> {
        db::create_package(&self.pool, user_session, input).await
    }

    pub async fn get_package(
        &self,
        id: i64,
        user_session: &str,
    ) -> Result<Option<PackageView>, StorageError> {
        db::get_package(&self.pool, id, user_session).await
    }

    pub async fn list_packages(
        &self,
        user_session: &str,
        skip: i64,
        limit: Option<i64>,
    ) -> Result<Vec<PackageView>, StorageError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(0);
        db::list_packages(&self.pool, user_session, skip.max(0), limit).await
    }

    /// Update a package the session owns. Setting `delivery_cost` overrides
    /// the computed value.
    pub async fn update_package(
        &self,
        id: i64,
        user_session: &str,
        update: &PackageUpdate,
    ) -> Result<Option<PackageRecord>, StorageError> {
        db::update_package(&self.pool, id, user_session, update).await
    }

    pub async fn delete_package(
        &self,
        id: i64,
        user_session: &str,
    ) -> Result<Option<PackageRecord>, StorageError> {
        db::delete_package(&self.pool, id, user_session).await
    }

    pub async fn package_types(&self, skip: i64, limit: i64) -> Result<Vec<PackageType>, StorageError> {
        db::list_package_types(&self.pool, skip.max(0), limit.max(0)).await
    }
}
