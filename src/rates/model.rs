use serde::Deserialize;
use std::collections::HashMap;

/// Daily rates document (`daily_json.js`). Only the fields the pipeline
/// reads are modelled.
#[derive(Debug, Deserialize)]
pub struct DailyRatesResp {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Valute")]
    pub valute: HashMap<String, CurrencyQuote>,
}

#[derive(Debug, Deserialize)]
pub struct CurrencyQuote {
    #[serde(rename = "Value")]
    pub value: f64,
}
