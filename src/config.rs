use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

use crate::fee::{MONEY_SCALE, fits_money_scale};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Bounded wait for a row lock before failing with `LockTimeout`
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub market: MarketConfig,
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub recycler: RecyclerConfig,
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

/// Pricing and funding rules (consumed, not owned, by the core)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MarketConfig {
    /// Fraction of `total_price` charged to the seller, `0 <= rate < 1`
    #[serde(default)]
    pub service_fee_rate: Decimal,
    pub min_unit_price: Decimal,
    pub max_unit_price: Decimal,
    /// Withdrawals must be a multiple of this
    #[serde(default = "default_step")]
    pub withdraw_step: Decimal,
    /// Recharges must be a multiple of this
    #[serde(default = "default_step")]
    pub recharge_step: Decimal,
}

fn default_step() -> Decimal {
    Decimal::ONE_HUNDRED
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            service_fee_rate: Decimal::ZERO,
            min_unit_price: Decimal::ZERO,
            max_unit_price: Decimal::MAX,
            withdraw_step: default_step(),
            recharge_step: default_step(),
        }
    }
}

/// Game platform endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    pub base_url: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

/// Background recycling matcher
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecyclerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Query the seller's remote balance before each match
    pub verify_seller_balance: bool,
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            verify_seller_balance: true,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.market;
        if m.service_fee_rate < Decimal::ZERO || m.service_fee_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid(format!(
                "service_fee_rate must be in [0, 1), got {}",
                m.service_fee_rate
            )));
        }
        if m.min_unit_price < Decimal::ZERO || m.min_unit_price > m.max_unit_price {
            return Err(ConfigError::Invalid(format!(
                "unit price bounds [{}, {}] are not a valid range",
                m.min_unit_price, m.max_unit_price
            )));
        }
        if !fits_money_scale(m.min_unit_price) || !fits_money_scale(m.max_unit_price) {
            return Err(ConfigError::Invalid(format!(
                "unit price bounds must have at most {} decimal places",
                MONEY_SCALE
            )));
        }
        if m.withdraw_step <= Decimal::ZERO || m.recharge_step <= Decimal::ZERO {
            return Err(ConfigError::Invalid("funding steps must be positive".into()));
        }
        if self.recycler.interval_secs == 0 {
            return Err(ConfigError::Invalid("recycler.interval_secs must be > 0".into()));
        }
        if self.settlement.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("settlement.base_url is empty".into()));
        }
        Ok(())
    }
}
