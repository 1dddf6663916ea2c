use closet_core::GatewaySettings;
use closet_order::PayoutRules;
use closet_shared::{LedgerError, Money, Percentage};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub gateway: GatewaySettings,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub moderation: ModerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Initiated payments older than this are expired by the sweeper.
    pub transaction_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Commission applied to products that carry no rate of their own.
    pub default_commission_rate: Decimal,
    #[serde(default)]
    pub min_payout_amount: Decimal,
    #[serde(default = "default_payout_retries")]
    pub max_payout_retries: usize,
    #[serde(default = "default_payment_requests_per_minute")]
    pub payment_requests_per_minute: i64,
}

fn default_payout_retries() -> usize {
    5
}

fn default_payment_requests_per_minute() -> i64 {
    10
}

impl BusinessRules {
    pub fn payout_rules(&self) -> PayoutRules {
        PayoutRules {
            min_amount: Money::new(self.min_payout_amount),
            max_retries: self.max_payout_retries,
        }
    }

    pub fn default_commission(&self) -> Result<Percentage, LedgerError> {
        Percentage::new(self.default_commission_rate)
    }

    pub fn transaction_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.transaction_ttl_seconds as i64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "closet-engine".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModerationConfig {
    #[serde(default)]
    pub blocked_terms: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `CLOSET__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("CLOSET").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
