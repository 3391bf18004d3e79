use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A shipped package owned by one user session.
///
/// `delivery_cost` stays `None` until the background pipeline prices it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PackageRecord {
    pub id: i64,
    pub user_session: String,
    pub name: String,
    pub weight: f64,
    pub content_cost: f64,
    pub type_id: i64,
    pub delivery_cost: Option<f64>,
}

/// A package as returned to its owner, with the name of its type.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PackageView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub package: PackageRecord,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PackageType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Exchange rate as published by the provider for one reporting date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub as_of: String,
    pub value: f64,
}

impl RateSnapshot {
    pub fn new(as_of: impl Into<String>, value: f64) -> Self {
        Self {
            as_of: as_of.into(),
            value,
        }
    }
}
