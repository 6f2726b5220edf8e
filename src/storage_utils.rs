use crate::error::DigestError;
use crate::format::{Currency, FxRates};
use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

// CONFIGURATION STRUCTS
// Every section has serde defaults so a partial (or absent) config.json still loads.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct QuoteConfig {
    pub base_url: String,
    pub interval: String, // e.g., "4hour"
    pub limit: usize,     // newest candles kept per symbol
    pub min_candles: usize,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://financialmodelingprep.com".to_string(),
            interval: "4hour".to_string(),
            limit: 50,
            min_candles: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EmailConfig {
    pub base_url: String,
    pub from: String,
    pub site_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.resend.com".to_string(),
            from: "MetalDetectors <signals@metaldetectors.info>".to_string(),
            site_url: "https://metaldetectors.info".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FxConfig {
    pub base_url: String,
    pub eur: f64,
    pub gbp: f64,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://v6.exchangerate-api.com".to_string(),
            eur: 0.92,
            gbp: 0.79,
        }
    }
}

impl FxConfig {
    pub fn static_rates(&self) -> FxRates {
        FxRates::from_pairs([
            (Currency::Usd, 1.0),
            (Currency::Eur, self.eur),
            (Currency::Gbp, self.gbp),
        ])
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub quotes: QuoteConfig,
    pub ai: AiConfig,
    pub email: EmailConfig,
    pub fx: FxConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Rejects settings that would leave the indicators without enough history.
    pub fn validate(&self) -> Result<(), DigestError> {
        if self.quotes.min_candles == 0 {
            return Err(DigestError::Config("quotes.min_candles must be at least 1".to_string()));
        }
        if self.quotes.limit < self.quotes.min_candles {
            return Err(DigestError::Config(format!(
                "quotes.limit ({}) must not be below quotes.min_candles ({})",
                self.quotes.limit, self.quotes.min_candles
            )));
        }
        if self.ai.timeout_secs == 0 {
            return Err(DigestError::Config("ai.timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Provider credentials. Never read from config.json, only from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub fmp_api_key: String,
    pub gemini_api_key: String,
    pub resend_api_key: String,
    pub exchange_rate_api_key: Option<String>,
    pub trigger_secret: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("exchange_rate_api_key", &self.exchange_rate_api_key.is_some())
            .field("trigger_secret", &self.trigger_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            fmp_api_key: required_env("FMP_API_KEY")?,
            gemini_api_key: required_env("GEMINI_API_KEY")?,
            resend_api_key: required_env("RESEND_API_KEY")?,
            exchange_rate_api_key: optional_env("EXCHANGE_RATE_API_KEY"),
            trigger_secret: optional_env("TRIGGER_SECRET"),
        })
    }
}

fn required_env(name: &str) -> anyhow::Result<String> {
    optional_env(name).ok_or_else(|| anyhow::anyhow!("{} environment variable not set", name))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// STORAGE MANAGER

#[derive(Debug, Clone)]
pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// Storage rooted at an explicit directory, created if missing.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .await
                .with_context(|| format!("creating storage dir {:?}", base_dir))?;
        }
        Ok(Self { base_dir })
    }

    /// Serializes `data` to `<filename>.json` with a tmp-file + rename so a crash
    /// mid-write never leaves a truncated file behind.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // serde_json validates UTF-8 itself, no need for read_to_string
        let content = fs::read(&path)
            .await
            .with_context(|| format!("reading {:?}", path))?;

        let data = serde_json::from_slice(&content).with_context(|| format!("parsing {:?}", path))?;
        Ok(data)
    }

    /// Like `load`, but a missing file yields `T::default()`.
    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        if !fs::try_exists(&path).await? {
            return Ok(T::default());
        }
        self.load(filename).await
    }

    /// Writes `contents` to `relative` only if it does not exist yet.
    /// Returns `false` when the file was already present.
    pub async fn write_new(&self, relative: &str, contents: &[u8]) -> anyhow::Result<bool> {
        let path = self.base_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("creating {:?}", path)),
        };

        file.write_all(contents).await?;
        file.flush().await?;
        Ok(true)
    }

    pub async fn read_text(&self, relative: &str) -> anyhow::Result<Option<String>> {
        let path = self.base_dir.join(relative);
        match fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {:?}", path)),
        }
    }

    /// File names (not paths) inside a sub-directory. Missing directory → empty.
    pub async fn list_dir(&self, relative: &str) -> anyhow::Result<Vec<String>> {
        let dir = self.base_dir.join(relative);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

pub async fn load_config(storage: &AsyncStorageManager) -> anyhow::Result<AppConfig> {
    let config: AppConfig = storage.load_or_default("config").await?;
    config.validate()?;
    Ok(config)
}
