//! Process configuration read from environment variables.

use crate::db::pool::PoolSettings;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DATABASE_PATH: &str = "reviewers.db";
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite database file; created on first start.
    pub database_path: PathBuf,
    pub http_addr: SocketAddr,
    /// Upper bound for a single request, including lock waits.
    pub request_timeout: Duration,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Missing or blank variables fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = PoolSettings::default();

        let database_path = get("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));

        let http_addr = parse_addr(get("HTTP_ADDR").as_deref().unwrap_or(DEFAULT_HTTP_ADDR))?;

        let request_timeout_secs: u64 = parse_var(
            "REQUEST_TIMEOUT_SECS",
            get("REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        if request_timeout_secs == 0 {
            return Err(invalid("REQUEST_TIMEOUT_SECS", "must be greater than zero"));
        }

        let max_connections: u32 = parse_var(
            "DB_MAX_CONNECTIONS",
            get("DB_MAX_CONNECTIONS"),
            defaults.max_connections,
        )?;
        if max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be greater than zero"));
        }

        let busy_timeout_secs: u64 = parse_var(
            "DB_BUSY_TIMEOUT_SECS",
            get("DB_BUSY_TIMEOUT_SECS"),
            defaults.busy_timeout.as_secs(),
        )?;

        Ok(Config {
            database_path,
            http_addr,
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_connections,
            busy_timeout: Duration::from_secs(busy_timeout_secs),
        })
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            busy_timeout: self.busy_timeout,
        }
    }
}

fn invalid(name: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        message: message.into(),
    }
}

fn parse_var<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, format!("{:?}: {}", raw, e))),
        None => Ok(default),
    }
}

/// Accepts `host:port` or a bare `:port`, which binds every interface.
fn parse_addr(raw: &str) -> Result<SocketAddr, ConfigError> {
    let raw = raw.trim();
    let full = match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => raw.to_string(),
    };
    full.parse()
        .map_err(|e| invalid("HTTP_ADDR", format!("{:?}: {}", raw, e)))
}
