use crate::error::{DigestError, Result};
use crate::indicators::{self, BbStatus, Trend};
use crate::storage_utils::QuoteConfig;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Price reported for a symbol whose history is too thin to analyse.
pub const FALLBACK_PRICE: f64 = 2000.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    #[serde(rename = "XAU")]
    Xau,
    #[serde(rename = "XAG")]
    Xag,
    #[serde(rename = "Cu")]
    Cu,
    #[serde(rename = "Pt")]
    Pt,
    #[serde(rename = "Pd")]
    Pd,
}

impl Symbol {
    pub const ALL: [Symbol; 5] = [Symbol::Xau, Symbol::Xag, Symbol::Cu, Symbol::Pt, Symbol::Pd];

    pub fn code(self) -> &'static str {
        match self {
            Symbol::Xau => "XAU",
            Symbol::Xag => "XAG",
            Symbol::Cu => "Cu",
            Symbol::Pt => "Pt",
            Symbol::Pd => "Pd",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Symbol::Xau => "Gold",
            Symbol::Xag => "Silver",
            Symbol::Cu => "Copper",
            Symbol::Pt => "Platinum",
            Symbol::Pd => "Palladium",
        }
    }

    /// Ticker used by the quote provider.
    pub fn provider_ticker(self) -> &'static str {
        match self {
            Symbol::Xau => "XAUUSD",
            Symbol::Xag => "XAGUSD",
            Symbol::Cu => "HGUSD",
            Symbol::Pt => "PLUSD",
            Symbol::Pd => "PAUSD",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Candle {
    #[serde(rename = "date", deserialize_with = "deserialize_provider_time")]
    pub timestamp: NaiveDateTime,
    #[serde(deserialize_with = "deserialize_f64_lenient")]
    pub close: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub price: f64,
    pub rsi: f64,
    pub bb_status: BbStatus,
    pub trend: Trend,
}

impl MarketSnapshot {
    pub fn fallback(symbol: Symbol) -> Self {
        Self {
            symbol,
            price: FALLBACK_PRICE,
            rsi: indicators::NEUTRAL_RSI,
            bb_status: BbStatus::WithinRange,
            trend: Trend::Sideways,
        }
    }
}

/// Result of a single symbol fetch that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fresh(MarketSnapshot),
    /// History was too short; neutral values stand in.
    Fallback(MarketSnapshot),
}

impl FetchOutcome {
    pub fn snapshot(&self) -> &MarketSnapshot {
        match self {
            FetchOutcome::Fresh(s) | FetchOutcome::Fallback(s) => s,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, FetchOutcome::Fallback(_))
    }
}

/// Snapshot set for one run, keyed and iterated in symbol order.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct MarketData(BTreeMap<Symbol, MarketSnapshot>);

impl MarketData {
    pub fn get(&self, symbol: Symbol) -> Option<&MarketSnapshot> {
        self.0.get(&symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarketSnapshot> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<MarketSnapshot> for MarketData {
    fn from_iter<I: IntoIterator<Item = MarketSnapshot>>(iter: I) -> Self {
        Self(iter.into_iter().map(|s| (s.symbol, s)).collect())
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Candle history exactly as the provider orders it (newest first).
    async fn history(&self, symbol: Symbol) -> Result<Vec<Candle>>;
}

pub struct FmpClient {
    client: Client,
    api_key: String,
    config: QuoteConfig,
}

impl FmpClient {
    pub fn new(api_key: String, config: QuoteConfig) -> Result<Self> {
        let client = Client::builder().pool_max_idle_per_host(10).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }
}

#[async_trait]
impl QuoteSource for FmpClient {
    async fn history(&self, symbol: Symbol) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/historical-chart/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.interval,
            symbol.provider_ticker()
        );

        let response = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| DigestError::MarketData {
                symbol,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::QuoteStatus {
                symbol,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| DigestError::MarketData {
            symbol,
            reason: e.to_string(),
        })?;

        parse_candles(symbol, &body)
    }
}

/// Parses a provider payload. A non-array body (the provider reports quota
/// problems as a JSON object) is treated as an empty history.
pub fn parse_candles(symbol: Symbol, body: &[u8]) -> Result<Vec<Candle>> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| DigestError::MarketData {
        symbol,
        reason: format!("invalid JSON: {}", e),
    })?;

    if !value.is_array() {
        warn!(symbol = %symbol, "Quote provider returned a non-array payload");
        return Ok(Vec::new());
    }

    serde_json::from_value(value).map_err(|e| DigestError::MarketData {
        symbol,
        reason: format!("unexpected candle shape: {}", e),
    })
}

/// Turns a newest-first history into a snapshot.
pub fn build_snapshot(symbol: Symbol, mut candles: Vec<Candle>, config: &QuoteConfig) -> FetchOutcome {
    candles.truncate(config.limit);

    if candles.len() < config.min_candles.max(1) {
        warn!(
            symbol = %symbol,
            candles = candles.len(),
            required = config.min_candles,
            "Insufficient data, using fallback"
        );
        return FetchOutcome::Fallback(MarketSnapshot::fallback(symbol));
    }

    candles.reverse();

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let Some(&current_price) = closes.last() else {
        return FetchOutcome::Fallback(MarketSnapshot::fallback(symbol));
    };
    let technicals = indicators::calculate_technicals(&closes, current_price);

    debug!(
        symbol = %symbol,
        price = current_price,
        rsi = technicals.rsi,
        "Computed technicals"
    );

    FetchOutcome::Fresh(MarketSnapshot {
        symbol,
        price: current_price,
        rsi: technicals.rsi,
        bb_status: technicals.bb_status,
        trend: technicals.trend,
    })
}

pub async fn fetch_market_data(source: &dyn QuoteSource, symbol: Symbol, config: &QuoteConfig) -> Result<FetchOutcome> {
    let candles = source.history(symbol).await?;
    Ok(build_snapshot(symbol, candles, config))
}

/// Fetches every symbol concurrently. The first hard failure fails the batch.
pub async fn fetch_all(source: &dyn QuoteSource, config: &QuoteConfig) -> Result<Vec<FetchOutcome>> {
    let tasks = Symbol::ALL.iter().map(|&s| fetch_market_data(source, s, config));
    futures::future::try_join_all(tasks).await
}

// --- Lenient deserialization ---

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E> {
        Ok(v as f64)
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
        Ok(v as f64)
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.trim().parse::<f64>().map_err(E::custom)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = deserializer.deserialize_any(LenientF64Visitor)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(de::Error::custom("close price is not finite"))
    }
}

fn deserialize_provider_time<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(de::Error::custom)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashMap;

    /// Canned provider: newest-first candles per symbol, or a status error.
    #[derive(Default)]
    pub struct StaticQuotes {
        pub histories: HashMap<Symbol, Vec<Candle>>,
        pub failing: Option<Symbol>,
    }

    #[async_trait]
    impl QuoteSource for StaticQuotes {
        async fn history(&self, symbol: Symbol) -> Result<Vec<Candle>> {
            if self.failing == Some(symbol) {
                return Err(DigestError::QuoteStatus { symbol, status: 502 });
            }
            Ok(self.histories.get(&symbol).cloned().unwrap_or_default())
        }
    }

    /// `closes` given oldest-first; returned newest-first like the provider.
    pub fn newest_first(closes: &[f64]) -> Vec<Candle> {
        let start = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_time(chrono::NaiveTime::MIN);
        let mut candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::hours(4 * i as i64),
                close,
            })
            .collect();
        candles.reverse();
        candles
    }

    pub fn healthy_quotes() -> StaticQuotes {
        let closes: Vec<f64> = (0..60).map(|i| 20.0 + i as f64 * 0.1).collect();
        StaticQuotes {
            histories: Symbol::ALL.iter().map(|&s| (s, newest_first(&closes))).collect(),
            failing: None,
        }
    }

    #[test]
    fn test_parse_provider_payload() {
        let body = br#"[
            {"date": "2026-10-15 16:00:00", "open": 2040.1, "low": 2035, "high": 2055.5, "close": 2050.25, "volume": 1200},
            {"date": "2026-10-15 12:00:00", "open": 2030, "low": 2028, "high": 2041, "close": "2040.1", "volume": 900}
        ]"#;
        let candles = parse_candles(Symbol::Xau, body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 2050.25);
        assert_eq!(candles[1].close, 2040.1);
        assert!(candles[0].timestamp > candles[1].timestamp);
    }

    #[test]
    fn test_non_array_payload_is_empty_history() {
        let body = br#"{"Error Message": "Limit Reach"}"#;
        assert!(parse_candles(Symbol::Cu, body).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_candle_is_fatal() {
        let body = br#"[{"date": "yesterday", "close": 1.0}]"#;
        let err = parse_candles(Symbol::Pt, body).unwrap_err();
        assert!(matches!(err, DigestError::MarketData { symbol: Symbol::Pt, .. }));
    }

    #[test]
    fn test_snapshot_uses_oldest_first_order() {
        // falling for 45 candles, then a 5-candle rally at the end
        let mut closes: Vec<f64> = (0..45).map(|i| 100.0 - i as f64).collect();
        closes.extend([56.0, 58.0, 60.0, 62.0, 64.0]);
        let config = QuoteConfig::default();

        let outcome = build_snapshot(Symbol::Xag, newest_first(&closes), &config);
        let snap = outcome.snapshot();
        assert!(!outcome.is_fallback());
        assert_eq!(snap.price, 64.0);
        assert_eq!(snap.trend, Trend::Up);
    }

    #[test]
    fn test_keeps_newest_limit_candles() {
        let closes: Vec<f64> = (0..80).map(|i| i as f64).collect();
        let config = QuoteConfig::default();
        let outcome = build_snapshot(Symbol::Xau, newest_first(&closes), &config);
        assert_eq!(outcome.snapshot().price, 79.0);
    }

    #[test]
    fn test_thin_history_falls_back() {
        let closes: Vec<f64> = (0..29).map(|i| i as f64).collect();
        let outcome = build_snapshot(Symbol::Pd, newest_first(&closes), &QuoteConfig::default());
        assert_eq!(outcome, FetchOutcome::Fallback(MarketSnapshot::fallback(Symbol::Pd)));
        assert_eq!(outcome.snapshot().trend, Trend::Sideways);
        assert_eq!(outcome.snapshot().price, FALLBACK_PRICE);
    }

    #[test]
    fn test_limit_below_minimum_falls_back() {
        let closes: Vec<f64> = (0..40).map(|i| 2000.0 + i as f64).collect();
        let zero = QuoteConfig {
            limit: 0,
            ..QuoteConfig::default()
        };
        let outcome = build_snapshot(Symbol::Xau, newest_first(&closes), &zero);
        assert!(outcome.is_fallback());

        let short = QuoteConfig {
            limit: 20,
            ..QuoteConfig::default()
        };
        let outcome = build_snapshot(Symbol::Xau, newest_first(&closes), &short);
        assert_eq!(outcome.snapshot().price, FALLBACK_PRICE);
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_thin_symbol() {
        let mut quotes = healthy_quotes();
        quotes.histories.insert(Symbol::Pd, newest_first(&[1.0, 2.0, 3.0]));

        let outcomes = fetch_all(&quotes, &QuoteConfig::default()).await.unwrap();
        assert_eq!(outcomes.len(), 5);
        let fallbacks: Vec<Symbol> = outcomes
            .iter()
            .filter(|o| o.is_fallback())
            .map(|o| o.snapshot().symbol)
            .collect();
        assert_eq!(fallbacks, vec![Symbol::Pd]);
    }

    #[tokio::test]
    async fn test_fetch_all_fails_fast() {
        let mut quotes = healthy_quotes();
        quotes.failing = Some(Symbol::Cu);

        let err = fetch_all(&quotes, &QuoteConfig::default()).await.unwrap_err();
        assert!(matches!(err, DigestError::QuoteStatus { symbol: Symbol::Cu, status: 502 }));
    }

    #[test]
    fn test_symbol_serializes_as_code() {
        let data: MarketData = vec![MarketSnapshot::fallback(Symbol::Cu)].into_iter().collect();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["Cu"]["bb_status"], "within_range");
        assert_eq!(json["Cu"]["trend"], "sideways");
        assert_eq!(json["Cu"]["symbol"], "Cu");
    }
}
