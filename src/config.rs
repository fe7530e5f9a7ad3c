// Configuration management for the FX grid bot

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::types::Granularity;

/// Which venue environment to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Demo,
    Live,
}

impl Environment {
    pub fn rest_url(&self) -> &'static str {
        match self {
            Environment::Demo => "https://api-fxpractice.oanda.com",
            Environment::Live => "https://api-fxtrade.oanda.com",
        }
    }

    pub fn stream_url(&self) -> &'static str {
        match self {
            Environment::Demo => "https://stream-fxpractice.oanda.com",
            Environment::Live => "https://stream-fxtrade.oanda.com",
        }
    }

    pub fn default_token_env(&self) -> &'static str {
        match self {
            Environment::Demo => "OANDA_DEMO_TOKEN",
            Environment::Live => "OANDA_LIVE_TOKEN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub environment: Environment,
    /// Falls back to the first account the token can see
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl VenueConfig {
    pub fn rest_url(&self) -> String {
        self.rest_url
            .clone()
            .unwrap_or_else(|| self.environment.rest_url().to_string())
    }

    pub fn stream_url(&self) -> String {
        self.stream_url
            .clone()
            .unwrap_or_else(|| self.environment.stream_url().to_string())
    }

    pub fn token_env(&self) -> &str {
        self.token_env
            .as_deref()
            .unwrap_or_else(|| self.environment.default_token_env())
    }

    /// Read the access token from the process environment
    pub fn access_token(&self) -> Result<String, ConfigError> {
        let var = self.token_env();
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ConfigError::MissingCredential(format!(
                "environment variable {} is not set",
                var
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Share of margin available reserved for grid strategies
    pub grid_amount: f64,
    /// Share of margin available reserved for trend strategies
    pub trend_amount: f64,
    pub max_grids: usize,
    pub max_trenders: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub granularity: Granularity,
    pub count: usize,
    pub chop_length: usize,
    pub chop_high: f64,
    pub chop_low: f64,
    pub bb_length: usize,
    pub bb_std_dev: f64,
    /// Instruments with %B above this are skipped as extended
    pub bb_high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Divides the allocation to bound per-order notional exposure
    pub order_limit: f64,
    pub entry_atr_factor: f64,
    pub sl_atr_factor: f64,
    pub tp_atr_factor: f64,
    #[serde(default = "default_levels_per_side")]
    pub levels_per_side: usize,
    pub atr_granularity: Granularity,
    pub atr_length: usize,
    pub atr_count: usize,
    #[serde(default = "default_true")]
    pub attach_exits: bool,
    /// Attach a trailing stop of `ATR * factor` to every entry
    #[serde(default)]
    pub trailing_stop_atr_factor: Option<f64>,
    #[serde(default = "default_true")]
    pub flatten_on_reset: bool,
    #[serde(default = "default_max_grid_age")]
    pub max_grid_age_hours: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl GridConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_grid_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_grid_age_hours as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Pricing,
    Transactions,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub kind: StreamKind,
    #[serde(default)]
    pub instruments: Vec<String>,
    pub backoff_secs: u64,
    pub max_backoff_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub venue: VenueConfig,
    pub allocation: AllocationConfig,
    pub selection: SelectionConfig,
    pub grid: GridConfig,
    pub stream: StreamConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

fn default_request_timeout() -> u64 { 30 }
fn default_levels_per_side() -> usize { 1 }
fn default_true() -> bool { true }
fn default_max_grid_age() -> u64 { 168 }
fn default_poll_interval() -> u64 { 10 }
fn default_backoff_multiplier() -> f64 { 1.0 }

impl Default for Config {
    fn default() -> Self {
        Self {
            venue: VenueConfig {
                environment: Environment::Demo,
                account_id: None,
                token_env: None,
                rest_url: None,
                stream_url: None,
                request_timeout_secs: default_request_timeout(),
            },
            allocation: AllocationConfig {
                grid_amount: 0.5,
                trend_amount: 0.5,
                max_grids: 1,
                max_trenders: 1,
            },
            selection: SelectionConfig {
                granularity: Granularity::H1,
                count: 30,
                chop_length: 14,
                chop_high: 61.8,
                chop_low: 38.2,
                bb_length: 20,
                bb_std_dev: 2.0,
                bb_high: 0.8,
            },
            grid: GridConfig {
                order_limit: 5.0,
                entry_atr_factor: 0.25,
                sl_atr_factor: 1.5,
                tp_atr_factor: 1.5,
                levels_per_side: default_levels_per_side(),
                atr_granularity: Granularity::H1,
                atr_length: 14,
                atr_count: 15,
                attach_exits: true,
                trailing_stop_atr_factor: None,
                flatten_on_reset: true,
                max_grid_age_hours: default_max_grid_age(),
                poll_interval_secs: default_poll_interval(),
            },
            stream: StreamConfig {
                kind: StreamKind::Pricing,
                instruments: vec!["EUR_USD".to_string()],
                backoff_secs: 10,
                max_backoff_secs: 10,
                backoff_multiplier: default_backoff_multiplier(),
            },
            database: DatabaseConfig {
                path: "data/fx_grid.db".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alloc = &self.allocation;
        for (name, value) in [("grid_amount", alloc.grid_amount), ("trend_amount", alloc.trend_amount)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!("{} must be between 0 and 1", name)));
            }
        }
        if alloc.grid_amount + alloc.trend_amount > 1.0 + f64::EPSILON {
            return Err(ConfigError::Validation(
                "grid_amount + trend_amount must not exceed 1".to_string(),
            ));
        }
        if alloc.max_grids == 0 || alloc.max_trenders == 0 {
            return Err(ConfigError::Validation(
                "max_grids and max_trenders must be greater than 0".to_string(),
            ));
        }

        let sel = &self.selection;
        if sel.chop_low >= sel.chop_high {
            return Err(ConfigError::Validation("chop_low must be below chop_high".to_string()));
        }
        if sel.chop_length < 2 || sel.bb_length < 2 {
            return Err(ConfigError::Validation(
                "chop_length and bb_length must be at least 2".to_string(),
            ));
        }
        if sel.count <= sel.chop_length.max(sel.bb_length) {
            return Err(ConfigError::Validation(
                "selection count must exceed the longest indicator length".to_string(),
            ));
        }
        if sel.bb_std_dev <= 0.0 {
            return Err(ConfigError::Validation("bb_std_dev must be positive".to_string()));
        }

        let grid = &self.grid;
        if grid.order_limit <= 0.0 {
            return Err(ConfigError::Validation("order_limit must be positive".to_string()));
        }
        if grid.entry_atr_factor <= 0.0 || grid.sl_atr_factor <= 0.0 || grid.tp_atr_factor <= 0.0 {
            return Err(ConfigError::Validation("ATR factors must be positive".to_string()));
        }
        if grid.trailing_stop_atr_factor.map_or(false, |f| f <= 0.0) {
            return Err(ConfigError::Validation(
                "trailing_stop_atr_factor must be positive when set".to_string(),
            ));
        }
        if grid.levels_per_side == 0 {
            return Err(ConfigError::Validation(
                "levels_per_side must be greater than 0".to_string(),
            ));
        }
        if grid.atr_length == 0 || grid.atr_count <= grid.atr_length {
            return Err(ConfigError::Validation(
                "atr_count must exceed atr_length, which must be positive".to_string(),
            ));
        }
        if grid.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        let stream = &self.stream;
        if stream.backoff_secs == 0 || stream.max_backoff_secs < stream.backoff_secs {
            return Err(ConfigError::Validation(
                "stream backoff must be positive and not exceed max_backoff_secs".to_string(),
            ));
        }
        if stream.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if stream.kind == StreamKind::Pricing && stream.instruments.is_empty() {
            return Err(ConfigError::Validation(
                "a pricing stream needs at least one instrument".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}
