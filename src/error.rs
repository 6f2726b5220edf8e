use crate::market_data::Symbol;
use thiserror::Error as ThisError;

/// Failures of a digest run.
///
/// Everything that reaches the dispatch loop through `?` aborts the run before
/// any subscriber is mailed. Degraded and per-recipient failures are handled
/// where they happen and never surface as a `DigestError` from the pipeline.
#[derive(ThisError, Debug)]
pub enum DigestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Market data for {symbol} unavailable: {reason}")]
    MarketData { symbol: Symbol, reason: String },

    #[error("Quote provider returned {status} for {symbol}")]
    QuoteStatus { symbol: Symbol, status: u16 },

    #[error("Recommendation error: {0}")]
    Recommendation(String),

    #[error("Recommendation set is missing {0}")]
    MissingRecommendation(Symbol),

    #[error("{0} timed out after {1}s")]
    Timeout(&'static str, u64),

    #[error("Email provider error: {0}")]
    Email(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<std::io::Error> for DigestError {
    fn from(err: std::io::Error) -> Self {
        DigestError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for DigestError {
    fn from(err: reqwest::Error) -> Self {
        DigestError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(err: serde_json::Error) -> Self {
        DigestError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;
