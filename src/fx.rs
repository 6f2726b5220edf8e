use crate::error::{DigestError, Result};
use crate::format::{Currency, FxRates};
use crate::storage_utils::FxConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait FxSource: Send + Sync {
    async fn latest(&self) -> Result<FxRates>;
}

/// Fixed table from config.
pub struct StaticRates(pub FxRates);

#[async_trait]
impl FxSource for StaticRates {
    async fn latest(&self) -> Result<FxRates> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize, Debug)]
struct LatestRatesResponse {
    result: String,
    #[serde(default)]
    conversion_rates: HashMap<String, f64>,
}

/// exchangerate-api.com USD-based rates.
pub struct ExchangeRateApi {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ExchangeRateApi {
    pub fn new(api_key: String, config: &FxConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FxSource for ExchangeRateApi {
    async fn latest(&self) -> Result<FxRates> {
        let url = format!("{}/v6/{}/latest/USD", self.base_url, self.api_key);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: LatestRatesResponse = response.json().await?;

        if body.result != "success" {
            return Err(DigestError::Network(format!("FX provider result {:?}", body.result)));
        }

        let mut pairs = Vec::with_capacity(Currency::ALL.len());
        for currency in Currency::ALL {
            let rate = body
                .conversion_rates
                .get(currency.code())
                .copied()
                .filter(|r| r.is_finite() && *r > 0.0)
                .ok_or_else(|| DigestError::Parse(format!("FX provider has no usable {} rate", currency)))?;
            pairs.push((currency, rate));
        }
        Ok(FxRates::from_pairs(pairs))
    }
}

/// Rates for this run. A live-source failure degrades to `fallback`.
pub async fn rates_for_run(source: &dyn FxSource, fallback: &FxRates) -> FxRates {
    match source.latest().await {
        Ok(rates) => {
            info!(
                eur = rates.get(Currency::Eur),
                gbp = rates.get(Currency::Gbp),
                "FX rates loaded"
            );
            rates
        }
        Err(e) => {
            warn!(error = %e, "FX rate fetch failed, using static table");
            fallback.clone()
        }
    }
}
