//! Configuration management with validation and defaults
//!
//! Configuration is read from an optional TOML file, then overridden from
//! `CRASH_*` environment variables, then validated.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub round: RoundConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Multiplier growth curve selection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrowthConfig {
    /// Fixed increment per tick, in hundredths
    Linear { step_hundredths: u64 },
    /// `e^(rate * seconds)`
    Exponential { rate_per_second: f64 },
}

impl Default for GrowthConfig {
    fn default() -> Self {
        GrowthConfig::Linear { step_hundredths: 3 }
    }
}

/// Round timing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    pub betting_window_ms: u64,
    pub tick_interval_ms: u64,
    pub cooldown_ms: u64,
    /// Delay before retrying a failed round creation
    pub retry_backoff_ms: u64,
    pub growth: GrowthConfig,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_window_ms: 5_000,
            tick_interval_ms: 100,
            cooldown_ms: 5_000,
            retry_backoff_ms: 5_000,
            growth: GrowthConfig::default(),
        }
    }
}

/// Where prices come from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceKind {
    CoinGecko,
    Fixed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub source: PriceSourceKind,
    pub base_url: String,
    pub cache_ttl_ms: u64,
    pub timeout_ms: u64,
    /// Prices used by the fixed source
    pub fixed_btc_usd: f64,
    pub fixed_eth_usd: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            source: PriceSourceKind::CoinGecko,
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            cache_ttl_ms: 10_000,
            timeout_ms: 2_000,
            fixed_btc_usd: 60_000.0,
            fixed_eth_usd: 3_000.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Keep everything in memory (testing only!)
    pub in_memory: bool,
    pub timeout_ms: u64,
    /// Capacity of the ledger journal queue
    pub journal_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/crash_data".to_string(),
            in_memory: false,
            timeout_ms: 2_000,
            journal_capacity: 4_096,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Broadcast channel capacity for WebSocket fan-out
    pub event_buffer: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            event_buffer: 1_024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Balance granted to newly registered players
    pub initial_balance_usd: f64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            initial_balance_usd: 1_000.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "crash_engine=info,tower_http=info".to_string(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Fast timings, in-memory storage and fixed prices
    pub fn testing() -> Self {
        Self {
            round: RoundConfig {
                betting_window_ms: 200,
                tick_interval_ms: 10,
                cooldown_ms: 200,
                retry_backoff_ms: 100,
                growth: GrowthConfig::default(),
            },
            price: PriceConfig {
                source: PriceSourceKind::Fixed,
                timeout_ms: 200,
                ..Default::default()
            },
            storage: StorageConfig {
                in_memory: true,
                timeout_ms: 500,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Production deployment with persistence
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                data_directory: "./DB/crash_data".to_string(),
                in_memory: false,
                ..Default::default()
            },
            api: ApiConfig {
                request_timeout_secs: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("round.tick_interval_ms", 0, "must be > 0"));
        }
        if self.round.betting_window_ms == 0 {
            return Err(ConfigError::invalid("round.betting_window_ms", 0, "must be > 0"));
        }
        if self.round.retry_backoff_ms == 0 {
            return Err(ConfigError::invalid("round.retry_backoff_ms", 0, "must be > 0"));
        }
        match &self.round.growth {
            GrowthConfig::Linear { step_hundredths } if *step_hundredths == 0 => {
                return Err(ConfigError::invalid(
                    "round.growth.step_hundredths",
                    0,
                    "growth must be strictly increasing",
                ));
            }
            GrowthConfig::Exponential { rate_per_second }
                if !(rate_per_second.is_finite() && *rate_per_second > 0.0) =>
            {
                return Err(ConfigError::invalid(
                    "round.growth.rate_per_second",
                    rate_per_second,
                    "growth must be strictly increasing",
                ));
            }
            _ => {}
        }

        if self.price.cache_ttl_ms == 0 {
            return Err(ConfigError::invalid("price.cache_ttl_ms", 0, "must be > 0"));
        }
        if self.price.timeout_ms == 0 {
            return Err(ConfigError::invalid("price.timeout_ms", 0, "lookups must be bounded"));
        }
        if self.price.source == PriceSourceKind::CoinGecko && self.price.base_url.is_empty() {
            return Err(ConfigError::invalid("price.base_url", "", "required for coin_gecko"));
        }
        if self.price.source == PriceSourceKind::Fixed
            && !(self.price.fixed_btc_usd > 0.0 && self.price.fixed_eth_usd > 0.0)
        {
            return Err(ConfigError::invalid("price.fixed_*", "<= 0", "fixed prices must be positive"));
        }

        if self.storage.timeout_ms == 0 {
            return Err(ConfigError::invalid("storage.timeout_ms", 0, "store calls must be bounded"));
        }
        if !self.storage.in_memory && self.storage.data_directory.is_empty() {
            return Err(ConfigError::invalid("storage.data_directory", "", "required unless in_memory"));
        }
        if self.storage.journal_capacity == 0 {
            return Err(ConfigError::invalid("storage.journal_capacity", 0, "must be > 0"));
        }

        if self.api.port == 0 {
            return Err(ConfigError::invalid("api.port", 0, "Port cannot be zero"));
        }
        if self.api.event_buffer == 0 {
            return Err(ConfigError::invalid("api.event_buffer", 0, "must be > 0"));
        }

        if !(self.wallet.initial_balance_usd >= 0.0 && self.wallet.initial_balance_usd.is_finite()) {
            return Err(ConfigError::invalid(
                "wallet.initial_balance_usd",
                self.wallet.initial_balance_usd,
                "must be a non-negative amount",
            ));
        }

        Ok(())
    }

    pub fn betting_window(&self) -> Duration {
        Duration::from_millis(self.round.betting_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.round.tick_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.round.cooldown_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.round.retry_backoff_ms)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_millis(self.price.cache_ttl_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price.timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.timeout_ms)
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("CRASH_API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = parse_env("CRASH_API_PORT", "Invalid port number")? {
            config.api.port = port;
        }
        if let Ok(dir) = env::var("CRASH_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Some(in_memory) = parse_env("CRASH_IN_MEMORY", "Invalid boolean value")? {
            config.storage.in_memory = in_memory;
        }
        if let Some(ms) = parse_env("CRASH_BETTING_WINDOW_MS", "Invalid duration")? {
            config.round.betting_window_ms = ms;
        }
        if let Some(ms) = parse_env("CRASH_TICK_INTERVAL_MS", "Invalid duration")? {
            config.round.tick_interval_ms = ms;
        }
        if let Some(ms) = parse_env("CRASH_COOLDOWN_MS", "Invalid duration")? {
            config.round.cooldown_ms = ms;
        }
        if let Ok(url) = env::var("CRASH_PRICE_BASE_URL") {
            config.price.base_url = url;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &EngineConfig, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::Save(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::Save(format!("Failed to write to {}: {}", path, e)))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, reason: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, raw, reason)),
        Err(_) => Ok(None),
    }
}
