use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Flat shipping fee charged per order
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: Decimal,

    /// Subtotal at or above which shipping is free (unset disables free shipping)
    #[serde(default)]
    pub free_shipping_threshold: Option<Decimal>,

    /// Stock level at or below which a product is flagged as low stock
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_shipping_fee() -> Decimal {
    Decimal::ZERO
}

fn default_low_stock_threshold() -> i32 {
    5
}

impl AppConfig {
    /// Programmatic constructor, used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            shipping_fee: default_shipping_fee(),
            free_shipping_threshold: None,
            low_stock_threshold: default_low_stock_threshold(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Shipping fee for an order with the given subtotal, honoring the
    /// free-shipping threshold when one is configured.
    pub fn shipping_fee_for(&self, subtotal: Decimal) -> Decimal {
        match self.free_shipping_threshold {
            Some(threshold) if subtotal >= threshold => Decimal::ZERO,
            _ => self.shipping_fee,
        }
    }
}

/// Loads configuration from `config/{environment}.toml` (optional) with
/// `APP_`-prefixed environment variable overrides.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    let config_file = Path::new(CONFIG_DIR).join(format!("{}.toml", environment));

    let config: AppConfig = Config::builder()
        .add_source(File::from(config_file).required(false))
        .add_source(Environment::with_prefix("APP"))
        .build()?
        .try_deserialize()?;

    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("Invalid configuration: {}", e)))?;

    info!(environment = %config.environment, "Configuration loaded");
    Ok(config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shipping_fee_respects_free_threshold() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            8080,
            "test".to_string(),
        );
        cfg.shipping_fee = dec!(30000);
        cfg.free_shipping_threshold = Some(dec!(500000));

        assert_eq!(cfg.shipping_fee_for(dec!(250000)), dec!(30000));
        assert_eq!(cfg.shipping_fee_for(dec!(500000)), Decimal::ZERO);
        assert_eq!(cfg.shipping_fee_for(dec!(750000)), Decimal::ZERO);
    }

    #[test]
    fn shipping_fee_flat_without_threshold() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            8080,
            "test".to_string(),
        );
        cfg.shipping_fee = dec!(30000);

        assert_eq!(cfg.shipping_fee_for(dec!(1000000)), dec!(30000));
    }
}
