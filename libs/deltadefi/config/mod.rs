use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_true() -> bool {
    true
}

/// Main bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub market: MarketConfig,
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub venue: VenueConfig,
    pub quote: QuoteConfig,
    pub skew: SkewConfig,
    pub risk: RiskConfig,
    pub rate_limit: RateLimitConfig,
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// API key from .env (not in YAML)
    #[serde(skip)]
    pub api_key: String,

    /// Transaction signing key from .env (not in YAML)
    #[serde(skip)]
    pub signing_key: String,
}

/// Instruments on both venues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Reference instrument on the source venue, e.g. ADAUSDT
    pub symbol_src: String,
    /// Quoted instrument on the destination venue, e.g. ADAUSDM
    pub symbol_dst: String,
    /// Base asset of the destination instrument, e.g. ADA
    pub base_asset: String,
    /// Quote asset of the destination instrument, e.g. USDM
    pub quote_asset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    /// WAL checkpoint cadence in seconds
    #[serde(default = "DatabaseConfig::default_checkpoint_secs")]
    pub checkpoint_interval_secs: u64,
}

impl DatabaseConfig {
    fn default_checkpoint_secs() -> u64 {
        300
    }
}

/// Source market data stream (Binance-style combined streams)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub ws_url: String,
}

/// Destination venue endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub rest_url: String,
    pub account_ws_url: String,
}

/// Quote ladder shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    pub base_spread_bps: Decimal,
    pub tick_spread_bps: Decimal,
    pub num_layers: usize,
    /// Total quoted notional per side, in quote asset
    pub total_liquidity: Decimal,
    pub layer_liquidity_multiplier: Decimal,
    pub min_edge_bps: Decimal,
    /// Clamp bounds for the skew-adjusted half-spread
    pub min_spread_bps: Decimal,
    pub max_spread_bps: Decimal,
    pub min_requote_ms: u64,
    /// Minimum reference price move (absolute) before requoting
    pub requote_tick_threshold: Decimal,
    /// Ticker older than this is not quoted against
    pub stale_ms: u64,
    pub quote_ttl_ms: u64,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    #[serde(default = "default_true")]
    pub bid_enabled: bool,
    #[serde(default = "default_true")]
    pub ask_enabled: bool,
}

/// Inventory skew parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewConfig {
    /// Desired quote/base value ratio
    pub target_asset_ratio: Decimal,
    /// Imbalances inside this band are treated as balanced
    pub ratio_tolerance: Decimal,
    pub gamma_max: Decimal,
    /// Spread shift per unit of skew, in bps
    pub lambda_bps: Decimal,
    /// Size shift per unit of skew
    pub mu: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_open_orders: usize,
    pub max_skew: Decimal,
    pub min_quote_size: Decimal,
    #[serde(default)]
    pub emergency_stop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_orders_per_second: f64,
    pub burst_capacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub max_retries: i64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub workers: usize,
    /// Poll interval when no pending events are found
    #[serde(default = "OutboxConfig::default_poll_ms")]
    pub poll_interval_ms: u64,
}

impl OutboxConfig {
    fn default_poll_ms() -> u64 {
        50
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub request_secs: u64,
    pub account_idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 10,
            account_idle_secs: 180,
        }
    }
}

impl BotConfig {
    /// Load configuration from YAML file and .env
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        // Load YAML config
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config: BotConfig = serde_yaml::from_str(&yaml_content)?;

        // Load .env file
        dotenv::dotenv().ok(); // Don't fail if .env doesn't exist

        config.api_key = std::env::var("DELTADEFI_API_KEY")
            .map_err(|_| ConfigError::EnvVarMissing("DELTADEFI_API_KEY".to_string()))?;

        config.signing_key = std::env::var("DELTADEFI_SIGNING_KEY")
            .map_err(|_| ConfigError::EnvVarMissing("DELTADEFI_SIGNING_KEY".to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.quote.num_layers == 0 {
            return Err(ConfigError::ValidationError(
                "num_layers must be at least 1".to_string(),
            ));
        }

        if self.quote.total_liquidity <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "total_liquidity must be positive".to_string(),
            ));
        }

        if self.quote.tick_size <= Decimal::ZERO || self.quote.step_size <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "tick_size and step_size must be positive".to_string(),
            ));
        }

        if self.quote.min_spread_bps > self.quote.max_spread_bps {
            return Err(ConfigError::ValidationError(
                "min_spread_bps must be <= max_spread_bps".to_string(),
            ));
        }

        if !self.quote.bid_enabled && !self.quote.ask_enabled {
            return Err(ConfigError::ValidationError(
                "at least one side must be enabled".to_string(),
            ));
        }

        if self.skew.gamma_max <= Decimal::ZERO || self.skew.gamma_max > Decimal::ONE {
            return Err(ConfigError::ValidationError(
                "gamma_max must be in (0, 1]".to_string(),
            ));
        }

        if self.skew.ratio_tolerance < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "ratio_tolerance must be non-negative".to_string(),
            ));
        }

        if self.risk.max_position_size <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "max_position_size must be positive".to_string(),
            ));
        }

        if self.risk.min_quote_size < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "min_quote_size must be non-negative".to_string(),
            ));
        }

        if self.rate_limit.max_orders_per_second <= 0.0 || self.rate_limit.burst_capacity <= 0.0 {
            return Err(ConfigError::ValidationError(
                "rate limit parameters must be positive".to_string(),
            ));
        }

        if self.outbox.workers == 0 {
            return Err(ConfigError::ValidationError(
                "outbox workers must be at least 1".to_string(),
            ));
        }

        if self.outbox.backoff_base_ms == 0 || self.outbox.backoff_cap_ms < self.outbox.backoff_base_ms {
            return Err(ConfigError::ValidationError(
                "outbox backoff must satisfy 0 < base <= cap".to_string(),
            ));
        }

        Ok(())
    }
}

pub mod test_support {
    //! Ready-made config for unit and integration tests.

    use super::*;
    use rust_decimal_macros::dec;

    pub fn test_config() -> BotConfig {
        BotConfig {
            market: MarketConfig {
                symbol_src: "ADAUSDT".to_string(),
                symbol_dst: "ADAUSDM".to_string(),
                base_asset: "ADA".to_string(),
                quote_asset: "USDM".to_string(),
            },
            database: DatabaseConfig {
                path: ":memory:".to_string(),
                checkpoint_interval_secs: 300,
            },
            source: SourceConfig {
                ws_url: "wss://stream.binance.com:9443/stream".to_string(),
            },
            venue: VenueConfig {
                rest_url: "https://api-dev.deltadefi.io".to_string(),
                account_ws_url: "wss://api-dev.deltadefi.io/accounts/stream".to_string(),
            },
            quote: QuoteConfig {
                base_spread_bps: dec!(8),
                tick_spread_bps: dec!(10),
                num_layers: 10,
                total_liquidity: dec!(5000),
                layer_liquidity_multiplier: dec!(1.0),
                min_edge_bps: dec!(3),
                min_spread_bps: dec!(0),
                max_spread_bps: dec!(100),
                min_requote_ms: 100,
                requote_tick_threshold: dec!(0.0001),
                stale_ms: 5000,
                quote_ttl_ms: 2000,
                tick_size: dec!(0.0001),
                step_size: dec!(1),
                bid_enabled: true,
                ask_enabled: true,
            },
            skew: SkewConfig {
                target_asset_ratio: dec!(1.0),
                ratio_tolerance: dec!(0.1),
                gamma_max: dec!(0.5),
                lambda_bps: dec!(10),
                mu: dec!(0.8),
            },
            risk: RiskConfig {
                max_position_size: dec!(100000),
                max_daily_loss: dec!(500),
                max_open_orders: 50,
                max_skew: dec!(50000),
                min_quote_size: dec!(1),
                emergency_stop: false,
            },
            rate_limit: RateLimitConfig {
                max_orders_per_second: 5.0,
                burst_capacity: 5.0,
            },
            outbox: OutboxConfig {
                max_retries: 5,
                backoff_base_ms: 100,
                backoff_cap_ms: 10_000,
                workers: 2,
                poll_interval_ms: 10,
            },
            timeouts: TimeoutConfig::default(),
            api_key: "test-key".to_string(),
            signing_key: "test-signing-key".to_string(),
        }
    }
}
