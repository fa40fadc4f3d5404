use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str =
    "postgres://postgres@localhost:26257/fund_exchange?sslmode=disable";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parses `LOG_FORMAT`; unset means text.
    pub fn parse(raw: Option<&str>) -> anyhow::Result<Self> {
        match raw {
            None | Some("text") => Ok(LogFormat::Text),
            Some("json") => Ok(LogFormat::Json),
            Some(other) => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }

    /// Format used to initialise logging before the full config is loaded.
    /// An invalid value falls back to text and is reported by `Config::from_env`.
    pub fn from_env_or_text() -> Self {
        dotenv().ok();
        Self::parse(env::var("LOG_FORMAT").ok().as_deref()).unwrap_or(LogFormat::Text)
    }
}

/// Retry and polling knobs shared by the stream consumers and the outbox relay.
#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerConfig {
    pub consumer_name: String,
    pub batch_size: usize,
    pub block_ms: usize,
    /// Entries left unacknowledged by any consumer of the group for this long
    /// are claimed by the next fetch, so a renamed or retired consumer's
    /// backlog is not stranded.
    pub claim_idle: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    pub outbox_poll: Duration,
    pub outbox_batch_size: i64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_name: "consumer-0".to_string(),
            batch_size: 10,
            block_ms: 1000,
            claim_idle: Duration::from_secs(60),
            max_attempts: 5,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            outbox_poll: Duration::from_millis(500),
            outbox_batch_size: 50,
        }
    }
}

/// Resolved once at startup and handed to every component constructor.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub settlement_notes: String,
    pub log_format: LogFormat,
    pub consumer: ConsumerConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConsumerConfig::default();

        let log_format = LogFormat::parse(lookup("LOG_FORMAT").as_deref())?;

        Ok(Config {
            server_port: parse_or(&lookup, "SERVER_PORT", 3641)?,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            settlement_notes: lookup("SETTLEMENT_NOTES").unwrap_or_else(|| "default note".to_string()),
            log_format,
            consumer: ConsumerConfig {
                consumer_name: lookup("CONSUMER_NAME").unwrap_or(defaults.consumer_name),
                batch_size: parse_or(&lookup, "CONSUMER_BATCH_SIZE", defaults.batch_size)?,
                block_ms: parse_or(&lookup, "CONSUMER_BLOCK_MS", defaults.block_ms)?,
                claim_idle: Duration::from_millis(parse_or(&lookup, "CONSUMER_CLAIM_IDLE_MS", 60_000)?),
                max_attempts: parse_or(&lookup, "CONSUMER_MAX_ATTEMPTS", defaults.max_attempts)?,
                backoff: Duration::from_millis(parse_or(&lookup, "CONSUMER_BACKOFF_MS", 200)?),
                max_backoff: Duration::from_millis(parse_or(&lookup, "CONSUMER_MAX_BACKOFF_MS", 30_000)?),
                outbox_poll: Duration::from_millis(parse_or(&lookup, "OUTBOX_POLL_MS", 500)?),
                outbox_batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}
