use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub offer_timeout_secs: u64,
    pub max_resolve_retries: u32,
    pub store_max_attempts: u32,
    /// Server-side offer expiry; 0 turns the sweeper off.
    pub offer_expiry_secs: u64,
    pub expiry_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            offer_timeout_secs: parse_or_default("OFFER_TIMEOUT_SECS", 30)?,
            max_resolve_retries: parse_or_default("MAX_RESOLVE_RETRIES", 3)?,
            store_max_attempts: parse_or_default("STORE_MAX_ATTEMPTS", 5)?,
            offer_expiry_secs: parse_or_default("OFFER_EXPIRY_SECS", 45)?,
            expiry_sweep_interval_secs: parse_or_default("EXPIRY_SWEEP_INTERVAL_SECS", 5)?,
        };

        if config.store_max_attempts == 0 {
            return Err(AppError::Internal(
                "invalid STORE_MAX_ATTEMPTS: must be > 0".to_string(),
            ));
        }
        if config.expiry_sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "invalid EXPIRY_SWEEP_INTERVAL_SECS: must be > 0".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn offer_expiry(&self) -> Option<Duration> {
        (self.offer_expiry_secs > 0).then(|| Duration::from_secs(self.offer_expiry_secs))
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
