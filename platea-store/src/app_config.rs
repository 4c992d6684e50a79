use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub backend: BackendConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Which store is the source of truth for seat locks. The two real
/// backends are deployment-exclusive; when `mirror_to_redis` is set the
/// relational store stays authoritative and Redis is written
/// best-effort only.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub primary: BackendKind,
    #[serde(default)]
    pub mirror_to_redis: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// How long a seat lock lives without renewal. The cart deadline is
    /// derived from this same value.
    #[serde(default = "default_ttl")]
    pub reservation_ttl_seconds: u64,
    /// Interval of the background pass that deletes expired rows.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_ttl() -> u64 {
    900
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Environment-specific file, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `PLATEA__BUSINESS_RULES__RESERVATION_TTL_SECONDS=600`
            .add_source(config::Environment::with_prefix("PLATEA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
