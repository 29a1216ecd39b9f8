// src/config.rs

//! # Configuration System
//!
//! Environment-driven configuration for the sync pipelines. The binary loads
//! a `.env` file (if present) and calls [`SyncConfig::from_env`]; the
//! resulting struct is the single source of truth for all tunables and is
//! passed into each component explicitly. No component reads the environment
//! on its own.

use std::time::Duration;

use crate::errors::SyncError;

/// Default rows fetched per page from the raw store.
const DEFAULT_PAGE_SIZE: i64 = 5000;
/// Default rows per insert transaction (observed 100-500 in the pipelines).
const DEFAULT_BATCH_SIZE: usize = 100;
/// Default simultaneous in-flight metadata lookups.
const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 10;
/// Default lookup attempts before a pairing group is dropped.
const DEFAULT_ENRICHMENT_ATTEMPTS: u32 = 3;
/// Base delay for exponential backoff between lookup attempts.
const DEFAULT_ENRICHMENT_BASE_DELAY_MS: u64 = 2000;
/// HTTP timeout for a single lookup call.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
/// Default destination/source pool size.
const DEFAULT_POOL_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Connection string for the raw (append-only) store.
    pub raw_db_url: String,
    /// Connection string for the cleaned store.
    pub clean_db_url: String,
    pub pool_size: usize,
    pub page_size: i64,
    pub batch_size: usize,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Base URL of the coin-info lookup service.
    pub base_url: String,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub http_timeout: Duration,
}

impl SyncConfig {
    /// Build the configuration from environment variables. The two
    /// connection strings are required; everything else has defaults.
    pub fn from_env() -> Result<Self, SyncError> {
        let raw_db_url = require_env("RAW_DATABASE_URL")?;
        let clean_db_url = require_env("CLEAN_DATABASE_URL")?;

        Ok(Self {
            raw_db_url,
            clean_db_url,
            pool_size: parse_env("SYNC_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            page_size: parse_env("SYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            batch_size: parse_env("SYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            enrichment: EnrichmentConfig {
                base_url: std::env::var("COIN_INFO_API_URL").unwrap_or_default(),
                concurrency: parse_env(
                    "ENRICHMENT_CONCURRENCY",
                    DEFAULT_ENRICHMENT_CONCURRENCY,
                )?,
                max_attempts: parse_env("ENRICHMENT_MAX_ATTEMPTS", DEFAULT_ENRICHMENT_ATTEMPTS)?,
                base_delay: Duration::from_millis(parse_env(
                    "ENRICHMENT_BASE_DELAY_MS",
                    DEFAULT_ENRICHMENT_BASE_DELAY_MS,
                )?),
                http_timeout: Duration::from_secs(parse_env(
                    "ENRICHMENT_HTTP_TIMEOUT_SECS",
                    DEFAULT_HTTP_TIMEOUT_SECS,
                )?),
            },
        })
    }
}

fn require_env(key: &str) -> Result<String, SyncError> {
    std::env::var(key)
        .map_err(|_| SyncError::Config(format!("{} must be set", key)))
        .and_then(|v| {
            if v.trim().is_empty() {
                Err(SyncError::Config(format!("{} must not be empty", key)))
            } else {
                Ok(v)
            }
        })
}

fn parse_env<T>(key: &str, default: T) -> Result<T, SyncError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| SyncError::Config(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default() {
        std::env::remove_var("CLEANSYNC_TEST_UNSET");
        let v: usize = parse_env("CLEANSYNC_TEST_UNSET", 7).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("CLEANSYNC_TEST_GARBAGE", "not-a-number");
        let v: Result<usize, _> = parse_env("CLEANSYNC_TEST_GARBAGE", 1);
        assert!(v.is_err());
        std::env::remove_var("CLEANSYNC_TEST_GARBAGE");
    }
}
