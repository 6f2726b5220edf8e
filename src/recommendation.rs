use crate::error::{DigestError, Result};
use crate::market_data::{MarketData, Symbol};
use crate::storage_utils::AiConfig;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info, warn};

pub const SYSTEM_INSTRUCTION: &str = r#"
# Role: MetalDetectors commodities analyst

You are a senior quantitative analyst covering precious and base metals. You are
concise, data-driven and decisive: give a clear, actionable call for every asset.

## Input
A JSON object keyed by asset code: Gold (XAU), Silver (XAG), Copper (Cu),
Platinum (Pt) and Palladium (Pd). Each entry carries:
- price: latest 4-hour close in USD
- rsi: 14-period Relative Strength Index
- bb_status: price position against 20-period Bollinger Bands
  (above_high, below_low, within_range)
- trend: short-term direction (up, down, sideways)

## Analysis rules
- RSI above 70 or below 30: favour mean-reversion calls.
- Price outside the bands: treat as stretched, expect a pullback or a breakout.
- Otherwise follow the trend unless the technicals point to a sharp reversal.

## Output (strict JSON)
Return one raw JSON object and nothing else: no prose, no markdown.
It must contain exactly one entry per asset code with these fields:
- "ai_guess": starts with a verb, e.g. "Buy early", "Short at pivot", "Hold until news"
- "target_price": a number in USD
- "reasoning": at most 15 words naming the technical trigger
Optional fields: "volatility", "sentiment", "trend".

Example:
{
  "XAU": {
    "volatility": "High",
    "sentiment": "Positive",
    "trend": "Up",
    "ai_guess": "Buy early until pivot at 2050",
    "target_price": 2055,
    "reasoning": "RSI oversold on H4 with strong support at previous daily low."
  }
}

## Tone
Never write "It might", "Perhaps" or "Investors could".
Write "Target is", "Trend confirms", "Expect bounce at".
"#;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?").expect("valid fence pattern"));

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub ai_guess: String,
    pub target_price: f64,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
}

/// Badge colour family derived from the free-text guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Recommendation {
    pub fn action(&self) -> Action {
        let guess = self.ai_guess.to_lowercase();
        if guess.contains("sell") || guess.contains("short") {
            Action::Sell
        } else if guess.contains("buy") {
            Action::Buy
        } else {
            Action::Hold
        }
    }
}

/// Validated model output: one entry per symbol.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Recommendations(BTreeMap<Symbol, Recommendation>);

impl Recommendations {
    pub fn get(&self, symbol: Symbol) -> Option<&Recommendation> {
        self.0.get(&symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &Recommendation)> {
        self.0.iter().map(|(s, r)| (*s, r))
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.0.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(Symbol, Recommendation)> for Recommendations {
    fn from_iter<I: IntoIterator<Item = (Symbol, Recommendation)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Raw text of the model's reply.
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String>;
}

// --- Gemini ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    config: AiConfig,
}

impl GeminiClient {
    pub fn new(api_key: String, config: AiConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(DigestError::Config("Gemini API key cannot be empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system_instruction }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DigestError::Recommendation(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let body: GenerateResponse = response.json().await?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DigestError::Recommendation("Gemini returned no candidates".to_string()))?;

        Ok(text)
    }
}

// --- Prompt & parsing ---

pub fn build_prompt(market_data: &MarketData) -> Result<String> {
    Ok(format!("Current Market Data: {}", serde_json::to_string(market_data)?))
}

pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Parses the model reply. Every symbol must be present with a usable entry;
/// anything else rejects the whole set.
pub fn parse_recommendations(text: &str) -> Result<Recommendations> {
    let cleaned = strip_code_fences(text);
    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&cleaned)
        .map_err(|e| DigestError::Recommendation(format!("reply is not a JSON object: {}", e)))?;

    let mut parsed = BTreeMap::new();
    for (key, value) in raw {
        let Some(symbol) = Symbol::ALL.into_iter().find(|s| s.code() == key) else {
            warn!(key = %key, "Ignoring unexpected entry in model reply");
            continue;
        };

        let rec: Recommendation = serde_json::from_value(value)
            .map_err(|e| DigestError::Recommendation(format!("entry for {} is malformed: {}", symbol, e)))?;

        if rec.ai_guess.trim().is_empty() {
            return Err(DigestError::Recommendation(format!("empty ai_guess for {}", symbol)));
        }
        if !rec.target_price.is_finite() || rec.target_price < 0.0 {
            return Err(DigestError::Recommendation(format!(
                "invalid target_price {} for {}",
                rec.target_price, symbol
            )));
        }
        parsed.insert(symbol, rec);
    }

    if let Some(missing) = Symbol::ALL.into_iter().find(|s| !parsed.contains_key(s)) {
        return Err(DigestError::MissingRecommendation(missing));
    }

    Ok(Recommendations(parsed))
}

/// One model round trip for the whole snapshot set, bounded by `timeout`.
pub async fn generate_recommendations(
    model: &dyn ModelClient,
    market_data: &MarketData,
    timeout: Duration,
) -> Result<Recommendations> {
    let prompt = build_prompt(market_data)?;

    let text = tokio::time::timeout(timeout, model.generate(SYSTEM_INSTRUCTION, &prompt))
        .await
        .map_err(|_| DigestError::Timeout("Recommendation request", timeout.as_secs()))??;

    match parse_recommendations(&text) {
        Ok(recs) => {
            info!(symbols = recs.len(), "Parsed model recommendations");
            Ok(recs)
        }
        Err(e) => {
            error!(error = %e, reply = %text, "Failed to parse model reply");
            Err(e)
        }
    }
}
