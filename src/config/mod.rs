//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `SecretString` so it never
//! reaches logs.

use std::time::Duration;

use secrecy::SecretString;

use crate::coordinator::{IdempotentConfig, OnFailure};
use crate::error::{Error, Result};
use crate::timeout::{DEFAULT_TIMEOUT, TimeoutSetting};

/// Default record lifetime in the store.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(4320);

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// How long a waiter polls before giving up.
    pub timeout: Duration,
    /// How long the store keeps a record before it may be reclaimed.
    pub expiry: Duration,
    pub on_failure: OnFailure,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            timeout: duration_var("IDEMPOTENT_TIMEOUT", DEFAULT_TIMEOUT)?,
            expiry: duration_var("IDEMPOTENT_EXPIRY", DEFAULT_EXPIRY)?,
            on_failure: match std::env::var("IDEMPOTENT_ON_FAILURE") {
                Ok(policy) => policy.parse()?,
                Err(_) => OnFailure::default(),
            },
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Coordinator settings derived from this configuration.
    pub fn idempotent_config(&self) -> IdempotentConfig {
        IdempotentConfig::default()
            .with_timeout(self.timeout)
            .with_on_failure(self.on_failure)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Read a duration variable: milliseconds or an expression like `"1m"`.
fn duration_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => {
            let setting = match raw.trim().parse::<u64>() {
                Ok(ms) => TimeoutSetting::Millis(ms),
                Err(_) => TimeoutSetting::Expr(raw),
            };
            setting.to_duration().map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("{name}: {msg}")),
                other => other,
            })
        }
        Err(_) => Ok(default),
    }
}
