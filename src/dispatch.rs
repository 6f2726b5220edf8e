//! The daily digest pipeline: market data → model → per-subscriber email.

use crate::archive::{DigestArchive, FileArchive};
use crate::email::{Mailer, OutgoingEmail, ResendMailer};
use crate::error::Result;
use crate::format::{Currency, FxRates, Locale};
use crate::fx::{self, ExchangeRateApi, FxSource, StaticRates};
use crate::market_data::{self, FmpClient, MarketData, QuoteSource, Symbol};
use crate::recommendation::{self, GeminiClient, ModelClient, Recommendations};
use crate::storage_utils::{AppConfig, AsyncStorageManager, Secrets};
use crate::subscribers::{JsonSubscriberStore, Subscriber, SubscriberStore};
use crate::templates::{self, DigestContext};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// External collaborators of a run. Built once from config, swapped for
/// doubles in tests.
#[derive(Clone)]
pub struct Providers {
    pub quotes: Arc<dyn QuoteSource>,
    pub model: Arc<dyn ModelClient>,
    pub fx: Arc<dyn FxSource>,
    pub mailer: Arc<dyn Mailer>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub archive: Arc<dyn DigestArchive>,
}

impl Providers {
    pub fn from_config(config: &AppConfig, secrets: &Secrets, storage: &AsyncStorageManager) -> Result<Self> {
        let fx: Arc<dyn FxSource> = match &secrets.exchange_rate_api_key {
            Some(key) => Arc::new(ExchangeRateApi::new(key.clone(), &config.fx)?),
            None => Arc::new(StaticRates(config.fx.static_rates())),
        };

        Ok(Self {
            quotes: Arc::new(FmpClient::new(secrets.fmp_api_key.clone(), config.quotes.clone())?),
            model: Arc::new(GeminiClient::new(secrets.gemini_api_key.clone(), config.ai.clone())?),
            fx,
            mailer: Arc::new(ResendMailer::new(secrets.resend_api_key.clone(), &config.email)?),
            subscribers: Arc::new(JsonSubscriberStore::new(storage.clone())),
            archive: Arc::new(FileArchive::new(storage.clone())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStatus {
    Inserted,
    AlreadyArchived,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub market: MarketData,
    pub recommendations: Recommendations,
    pub fallback_symbols: Vec<Symbol>,
    pub archive: ArchiveStatus,
    pub subscribers: usize,
    pub sent: usize,
    pub failed: Vec<String>,
}

pub struct DigestPipeline {
    providers: Providers,
    config: AppConfig,
}

impl DigestPipeline {
    pub fn new(providers: Providers, config: AppConfig) -> Self {
        Self { providers, config }
    }

    /// Runs the whole digest for `date`. Errors returned here abort the run
    /// before any subscriber is contacted.
    #[instrument(skip_all, fields(date = %date))]
    pub async fn run(&self, date: NaiveDate) -> Result<RunSummary> {
        info!("Starting daily digest");

        // Step 1: Market data (fail-fast)
        let outcomes = market_data::fetch_all(self.providers.quotes.as_ref(), &self.config.quotes)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to fetch market data"))?;

        let fallback_symbols: Vec<Symbol> = outcomes
            .iter()
            .filter(|o| o.is_fallback())
            .map(|o| o.snapshot().symbol)
            .collect();
        let market: MarketData = outcomes.into_iter().map(|o| o.snapshot().clone()).collect();
        info!(
            symbols = market.len(),
            fallbacks = fallback_symbols.len(),
            "Fetched market data"
        );

        // Step 2: FX
        let fx_rates = fx::rates_for_run(self.providers.fx.as_ref(), &self.config.fx.static_rates()).await;

        // Step 3: Model recommendations (fail-fast)
        let timeout = Duration::from_secs(self.config.ai.timeout_secs);
        let recommendations =
            recommendation::generate_recommendations(self.providers.model.as_ref(), &market, timeout)
                .await
                .inspect_err(|e| error!(error = %e, "AI analysis failed"))?;

        // Step 4: Archive the canonical rendering
        let archive = self.archive_canonical(date, &market, &recommendations, &fx_rates).await;

        // Step 5: Subscribers
        let subscribers = self.providers.subscribers.active_subscribers().await?;
        info!(count = subscribers.len(), "Found active subscribers");

        // Step 6: Send, one isolated task per subscriber
        let tasks = subscribers
            .iter()
            .map(|sub| self.deliver(sub, date, &market, &recommendations, &fx_rates));
        let results = futures::future::join_all(tasks).await;

        let mut failed = Vec::new();
        for (sub, result) in subscribers.iter().zip(results) {
            if let Err(e) = result {
                warn!(email = %sub.email, plan = %sub.plan, error = %e, "Digest delivery failed");
                failed.push(sub.email.clone());
            }
        }

        let summary = RunSummary {
            date,
            market,
            recommendations,
            fallback_symbols,
            archive,
            subscribers: subscribers.len(),
            sent: subscribers.len() - failed.len(),
            failed,
        };

        info!(
            sent = summary.sent,
            failed = summary.failed.len(),
            fallbacks = summary.fallback_symbols.len(),
            "Sent {} emails",
            summary.sent
        );
        Ok(summary)
    }

    async fn archive_canonical(
        &self,
        date: NaiveDate,
        market: &MarketData,
        recommendations: &Recommendations,
        fx_rates: &FxRates,
    ) -> ArchiveStatus {
        let ctx = DigestContext {
            recommendations,
            market,
            currency: Currency::Usd,
            locale: Locale::EnUs,
            fx_rates,
            date,
            site_url: &self.config.email.site_url,
        };
        let html = templates::render_pro(&ctx);

        match self.providers.archive.insert_if_absent(date, &html).await {
            Ok(true) => {
                info!("Archived digest");
                ArchiveStatus::Inserted
            }
            Ok(false) => {
                info!("Digest already archived for this date, skipping");
                ArchiveStatus::AlreadyArchived
            }
            Err(e) => {
                error!(error = %e, "Failed to archive digest");
                ArchiveStatus::Failed
            }
        }
    }

    async fn deliver(
        &self,
        sub: &Subscriber,
        date: NaiveDate,
        market: &MarketData,
        recommendations: &Recommendations,
        fx_rates: &FxRates,
    ) -> Result<()> {
        let ctx = DigestContext {
            recommendations,
            market,
            currency: sub.currency,
            locale: sub.locale,
            fx_rates,
            date,
            site_url: &self.config.email.site_url,
        };

        let email = OutgoingEmail {
            from: self.config.email.from.clone(),
            to: sub.email.clone(),
            subject: templates::subject_for_plan(sub.plan, recommendations),
            html: templates::render_for_plan(sub.plan, &ctx),
        };

        self.providers.mailer.send(&email).await
    }
}
