use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub job_workers: usize,
    pub scraper: ScraperConfig,
}

/// Everything the phase jobs need to invoke and supervise the external
/// scraper subprocess. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// URL the subprocess posts callback events to.
    pub callback_url: String,
    /// Shared secret for callback authentication.
    pub callback_token: String,
    /// Path to the scraper executable.
    pub bin: String,
    /// Working-directory-relative module path passed via the environment.
    pub module_path: String,

    pub collect_timeout_secs: u64,
    pub collect_timeout_buffer_secs: u64,
    pub reset_timeout_secs: u64,
    pub parse_batch_timeout_secs: u64,

    pub batch_size: u32,
    pub concurrency: u32,
    pub min_request_interval_secs: u64,
    pub parse_batch_delay_secs: u64,
    pub blocked_ratio_threshold: f64,
    /// Safety valve: hard cap on parse batches per session.
    pub max_parse_batches: i32,
    pub heartbeat_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env_or("PORT", 8080)?,
            job_workers: env_or("JOB_WORKERS", 2)?,
            scraper: ScraperConfig::from_env()?,
        })
    }
}

impl ScraperConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            callback_url: env::var("CALLBACK_URL").context("CALLBACK_URL must be set")?,
            callback_token: env::var("CALLBACK_TOKEN").context("CALLBACK_TOKEN must be set")?,
            bin: env::var("SCRAPER_BIN").context("SCRAPER_BIN must be set")?,
            module_path: env::var("SCRAPER_MODULE_PATH").unwrap_or_else(|_| "scraper".to_string()),
            collect_timeout_secs: env_or("COLLECT_TIMEOUT_SECS", 600)?,
            collect_timeout_buffer_secs: env_or("COLLECT_TIMEOUT_BUFFER_SECS", 120)?,
            reset_timeout_secs: env_or("RESET_TIMEOUT_SECS", 180)?,
            parse_batch_timeout_secs: env_or("PARSE_BATCH_TIMEOUT_SECS", 1800)?,
            batch_size: env_or("PARSE_BATCH_SIZE", 30)?,
            concurrency: env_or("PARSE_CONCURRENCY", 2)?,
            min_request_interval_secs: env_or("MIN_REQUEST_INTERVAL_SECS", 1)?,
            parse_batch_delay_secs: env_or("PARSE_BATCH_DELAY_SECS", 5)?,
            blocked_ratio_threshold: env_or("BLOCKED_RATIO_THRESHOLD", 0.8)?,
            max_parse_batches: env_or("MAX_PARSE_BATCHES", 500)?,
            heartbeat_timeout_secs: env_or("HEARTBEAT_TIMEOUT_SECS", 300)?,
        })
    }

    /// Hard subprocess timeout for the collect phase (limit + buffer).
    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs + self.collect_timeout_buffer_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn parse_batch_timeout(&self) -> Duration {
        Duration::from_secs(self.parse_batch_timeout_secs)
    }

    pub fn parse_batch_delay(&self) -> Duration {
        Duration::from_secs(self.parse_batch_delay_secs)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            callback_url: "http://localhost:8080/api/scraper/callback".to_string(),
            callback_token: "dev-token".to_string(),
            bin: "scraper".to_string(),
            module_path: "scraper".to_string(),
            collect_timeout_secs: 600,
            collect_timeout_buffer_secs: 120,
            reset_timeout_secs: 180,
            parse_batch_timeout_secs: 1800,
            batch_size: 30,
            concurrency: 2,
            min_request_interval_secs: 1,
            parse_batch_delay_secs: 5,
            blocked_ratio_threshold: 0.8,
            max_parse_batches: 500,
            heartbeat_timeout_secs: 300,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
