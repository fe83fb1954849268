//! Environment configuration.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreBackend { #[default] Postgres, Memory }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub notify_subject: String,
    pub order_timeout: Duration,
}

fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match get("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => return Err(ConfigError::Invalid { key: "STORE_BACKEND", value: other.to_string() }),
        };
        let database_url = get("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        let timeout_ms: u64 = parse(&get, "ORDER_TIMEOUT_MS", 10_000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid { key: "ORDER_TIMEOUT_MS", value: "0".into() });
        }

        Ok(Self {
            backend,
            database_url,
            max_connections: parse(&get, "DB_MAX_CONNECTIONS", 10)?,
            port: parse(&get, "PORT", 8083)?,
            nats_url: get("NATS_URL").filter(|url| !url.trim().is_empty()),
            notify_subject: get("NOTIFY_SUBJECT").unwrap_or_else(|| "storefront.orders.confirmation".to_string()),
            order_timeout: Duration::from_millis(timeout_ms),
        })
    }
}
