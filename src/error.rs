//! Error types shared across the pipeline components.
use thiserror::Error;

/// Failures talking to the upstream exchange-rate provider.
#[derive(Debug, Error)]
pub enum RateError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },
    #[error("malformed payload from {endpoint}: {reason}")]
    Payload { endpoint: String, reason: String },
    #[error("currency {0} missing from rate payload")]
    MissingCurrency(String),
    #[error("max retries exceeded after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<RateError>,
    },
}

/// Cache backend is unreachable or rejected the command.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid record: {0}")]
    Invalid(&'static str),
}

/// Anything that can abort a single pipeline tick.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
