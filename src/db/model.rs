//! Input models accepted by the package repository.
//!
//! Keep these structs focused on what callers may write. Ownership and the
//! computed delivery cost are set by the repository and the pipeline.

use crate::error::StorageError;

/// Fields required to create a package for a session.
#[derive(Debug, Clone)]
pub struct NewPackage {
    pub name: String,
    pub weight: f64,
    pub content_cost: f64,
    pub type_id: i64,
}

impl NewPackage {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.name.trim().is_empty() {
            return Err(StorageError::Invalid("name must be non-empty"));
        }
        if !(self.weight > 0.0) {
            return Err(StorageError::Invalid("weight must be > 0"));
        }
        if !(self.content_cost > 0.0) {
            return Err(StorageError::Invalid("content_cost must be > 0"));
        }
        Ok(())
    }
}

/// Partial update. `delivery_cost: Some(_)` is an explicit override of the
/// computed value.
#[derive(Debug, Clone, Default)]
pub struct PackageUpdate {
    pub name: Option<String>,
    pub weight: Option<f64>,
    pub content_cost: Option<f64>,
    pub type_id: Option<i64>,
    pub delivery_cost: Option<f64>,
}

impl PackageUpdate {
    pub fn validate(&self) -> Result<(), StorageError> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err(StorageError::Invalid("name must be non-empty"));
        }
        if matches!(self.weight, Some(w) if !(w > 0.0)) {
            return Err(StorageError::Invalid("weight must be > 0"));
        }
        if matches!(self.content_cost, Some(c) if !(c > 0.0)) {
            return Err(StorageError::Invalid("content_cost must be > 0"));
        }
        if matches!(self.delivery_cost, Some(d) if d < 0.0) {
            return Err(StorageError::Invalid("delivery_cost must be >= 0"));
        }
        Ok(())
    }
}
