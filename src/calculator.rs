//! Delivery cost pricing.
use std::sync::Arc;
use tracing::{info, instrument};

use crate::cache::RateCache;
use crate::error::RateError;
use crate::model::{PackageRecord, RateSnapshot};
use crate::rates::RateProviderFactory;

/// Flat charge per kilogram, in the provider's source currency.
pub const PER_KG_RATE: f64 = 0.5;
/// Share of the declared content value added as a surcharge.
pub const CONTENT_SURCHARGE: f64 = 0.01;

/// `round((weight * 0.5 + content_cost * 0.01) * rate, 2)`
pub fn compute_cost(weight: f64, content_cost: f64, rate: f64) -> f64 {
    round2((weight * PER_KG_RATE + content_cost * CONTENT_SURCHARGE) * rate)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct DeliveryCostCalculator {
    cache: RateCache,
    rates: Arc<dyn RateProviderFactory>,
}

impl DeliveryCostCalculator {
    pub fn new(cache: RateCache, rates: Arc<dyn RateProviderFactory>) -> Self {
        Self { cache, rates }
    }

    pub async fn current_rate(&self) -> Result<RateSnapshot, RateError> {
        self.cache.get_or_fetch(self.rates.as_ref()).await
    }

    /// Price every record in place using one rate lookup for the whole batch.
    ///
    /// If the rate cannot be obtained no record is touched. An empty batch
    /// does not look up a rate.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn process_batch(&self, records: &mut [PackageRecord]) -> Result<(), RateError> {
        if records.is_empty() {
            return Ok(());
        }
        let rate = self.current_rate().await?;
        for rec in records.iter_mut() {
            rec.delivery_cost = Some(compute_cost(rec.weight, rec.content_cost, rate.value));
        }
        info!(as_of = %rate.as_of, rate = rate.value, "priced packages");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_cost_matches_reference_example() {
        assert_eq!(compute_cost(2.5, 25.0, 92.5), 138.75);
    }

    #[test]
    fn compute_cost_rounds_to_cents() {
        // (1 * 0.5 + 10 * 0.01) * 3.3333 = 1.99998
        assert_eq!(compute_cost(1.0, 10.0, 3.3333), 2.0);
        // (0.3 * 0.5 + 1.0 * 0.01) * 1.0 = 0.16
        assert_eq!(compute_cost(0.3, 1.0, 1.0), 0.16);
    }

    #[test]
    fn compute_cost_scales_with_rate() {
        let base = compute_cost(4.0, 100.0, 1.0);
        assert_eq!(base, 3.0);
        assert_eq!(compute_cost(4.0, 100.0, 90.0), 270.0);
    }
}
