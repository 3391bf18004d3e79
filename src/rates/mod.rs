//! Client for the upstream daily exchange-rate provider.
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Url};
use std::fmt;
use std::future::Future;
use tracing::{debug, error, instrument, warn};

use crate::config;
use crate::error::RateError;
use crate::model::RateSnapshot;
use crate::rates::model::DailyRatesResp;

pub mod model;

/// Source of the current exchange rate.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self) -> Result<RateSnapshot, RateError>;
}

/// Opens a [`RateProvider`] for the duration of one pipeline tick. The
/// provider's connection pool is released when it is dropped.
pub trait RateProviderFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn RateProvider>, RateError>;
}

#[derive(Clone)]
pub struct ExchangeRateClient {
    http: Client,
    base_url: Url,
    endpoint: String,
    currency: String,
    user_agent: String,
    max_retries: u32,
}

impl fmt::Debug for ExchangeRateClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRateClient")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("currency", &self.currency)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ExchangeRateClient {
    pub fn from_config(cfg: &config::Rates) -> Result<Self, RateError> {
        let base_url = Url::parse(&cfg.base_url).map_err(|e| RateError::Payload {
            endpoint: cfg.base_url.clone(),
            reason: format!("invalid base URL: {e}"),
        })?;
        let http = Client::builder()
            .timeout(cfg.timeout())
            .no_proxy()
            .build()
            .map_err(RateError::Client)?;
        Ok(Self {
            http,
            base_url,
            endpoint: cfg.endpoint.clone(),
            currency: cfg.currency.clone(),
            user_agent: cfg.user_agent.clone(),
            max_retries: cfg.max_retries,
        })
    }

    pub fn endpoint_url(&self) -> Result<Url, RateError> {
        self.base_url
            .join(&self.endpoint)
            .map_err(|e| RateError::Payload {
                endpoint: self.endpoint.clone(),
                reason: format!("invalid endpoint: {e}"),
            })
    }

    pub fn build_request(&self) -> Result<reqwest::Request, RateError> {
        let url = self.endpoint_url()?;
        let endpoint = url.to_string();
        self.http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .build()
            .map_err(|source| RateError::Transport { endpoint, source })
    }

    async fn attempt(&self) -> Result<RateSnapshot, RateError> {
        let request = self.build_request()?;
        let endpoint = request.url().to_string();

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|source| RateError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(RateError::Status { endpoint, status });
        }

        let body = res.text().await.map_err(|source| RateError::Transport {
            endpoint: endpoint.clone(),
            source,
        })?;
        debug!(bytes = body.len(), "rate payload received");
        parse_daily_rates(&endpoint, &body, &self.currency)
    }
}

#[async_trait]
impl RateProvider for ExchangeRateClient {
    #[instrument(skip_all, fields(currency = %self.currency))]
    async fn fetch_rate(&self) -> Result<RateSnapshot, RateError> {
        let endpoint = self.endpoint.clone();
        with_retries(self.max_retries, &endpoint, |_| self.attempt()).await
    }
}

/// Builds an [`ExchangeRateClient`] from the configured provider settings.
#[derive(Debug, Clone)]
pub struct HttpRateProviderFactory {
    settings: config::Rates,
}

impl HttpRateProviderFactory {
    pub fn new(settings: config::Rates) -> Self {
        Self { settings }
    }
}

impl RateProviderFactory for HttpRateProviderFactory {
    fn open(&self) -> Result<Box<dyn RateProvider>, RateError> {
        Ok(Box::new(ExchangeRateClient::from_config(&self.settings)?))
    }
}

/// Run `op` up to `max_retries + 1` times with no delay between attempts.
///
/// `op` receives the 1-based attempt number. The loop only exits through a
/// return: the first success, or the last failure wrapped in
/// [`RateError::RetriesExhausted`].
pub async fn with_retries<T, F, Fut>(
    max_retries: u32,
    endpoint: &str,
    mut op: F,
) -> Result<T, RateError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RateError>>,
{
    let attempts = max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(attempt, attempts, endpoint, error = %err, "rate request failed; retrying");
                attempt += 1;
            }
            Err(err) => {
                error!(attempt, attempts, endpoint, error = %err, "rate request failed; giving up");
                return Err(RateError::RetriesExhausted {
                    attempts,
                    source: Box::new(err),
                });
            }
        }
    }
}

/// Extract `currency` from a daily rates document.
pub fn parse_daily_rates(
    endpoint: &str,
    body: &str,
    currency: &str,
) -> Result<RateSnapshot, RateError> {
    let payload: DailyRatesResp = serde_json::from_str(body).map_err(|e| RateError::Payload {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    let quote = payload
        .valute
        .get(currency)
        .ok_or_else(|| RateError::MissingCurrency(currency.to_string()))?;
    if !quote.value.is_finite() || quote.value <= 0.0 {
        return Err(RateError::Payload {
            endpoint: endpoint.to_string(),
            reason: format!("non-positive rate {} for {}", quote.value, currency),
        });
    }
    Ok(RateSnapshot::new(payload.date, quote.value))
}
