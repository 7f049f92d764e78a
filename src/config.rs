use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::service::ImportConfig;
use crate::store::QueueOptions;
use crate::worker::ProcessorConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub import: ImportConfig,
    pub processor: ProcessorConfig,
    pub queue: QueueOptions,
}

impl Config {
    /// Read the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mongo_uri = lookup("MONGO_URI")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("MONGO_URI"))?;
        let database_name = lookup("DATABASE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "taskline".to_string());

        let concurrency: usize = parse(&lookup, "IMPORT_CONCURRENCY", 10)?;
        if concurrency == 0 {
            return Err(invalid("IMPORT_CONCURRENCY", "must be at least 1"));
        }
        let rate_limit: u32 = parse(&lookup, "IMPORT_RATE_LIMIT", 100)?;

        let batch_size: usize = parse(&lookup, "WORKER_BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(invalid("WORKER_BATCH_SIZE", "must be at least 1"));
        }
        let poll_interval_ms: u64 = parse(&lookup, "WORKER_POLL_INTERVAL_MS", 1000)?;

        let max_retries: i32 = parse(
            &lookup,
            "NOTIFICATION_MAX_RETRIES",
            crate::models::DEFAULT_MAX_RETRIES,
        )?;
        if max_retries < 0 {
            return Err(invalid("NOTIFICATION_MAX_RETRIES", "must not be negative"));
        }
        let lease_secs: i64 = parse(&lookup, "NOTIFICATION_LEASE_SECS", 30)?;
        if lease_secs <= 0 {
            return Err(invalid("NOTIFICATION_LEASE_SECS", "must be positive"));
        }

        Ok(Config {
            mongo_uri,
            database_name,
            import: ImportConfig {
                concurrency,
                rate_limit: (rate_limit > 0).then_some(rate_limit),
            },
            processor: ProcessorConfig {
                batch_size,
                poll_interval: Duration::from_millis(poll_interval_ms),
            },
            queue: QueueOptions {
                max_retries,
                lease: chrono::Duration::seconds(lease_secs),
            },
        })
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{:?}: {}", raw, e),
        }),
    }
}
