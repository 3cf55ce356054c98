//! Environment-driven runtime configuration.
//!
//! The bridge is configured entirely through environment variables (it is
//! meant to run as a container next to the Signal gateway). Required keys
//! fail fast at startup with a message naming the missing variable; optional
//! keys fall back to the documented defaults.

use anyhow::{Context, Result};
use std::time::Duration;

const DEFAULT_GROUP_CACHE_SIZE: usize = 1000;
const DEFAULT_TIMESCALE_HOST: &str = "localhost";
const DEFAULT_TIMESCALE_PORT: u16 = 5432;
const DEFAULT_TIMESCALE_DATABASE: &str = "signalbus";
const DEFAULT_TIMESCALE_USERNAME: &str = "postgres";
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 5;

/// Top-level runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the Signal gateway, no scheme.
    pub signal_endpoint: String,
    /// The account this process serves.
    pub registered_account: String,
    /// Full assistant webhook URL.
    pub webhook_url: String,
    /// Token sent as `Basic {base64(token)}` to the webhook.
    pub auth_token: String,
    /// Raw comma-separated allow-list; empty means deny everyone.
    pub authorization_whitelist: String,
    /// Max entries in the group id LRU cache.
    pub group_cache_size: usize,
    pub timescale: TimescaleConfig,
}

/// Connection and batching settings for the archive database.
#[derive(Debug, Clone)]
pub struct TimescaleConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Max records per committed batch.
    pub batch_size: usize,
    /// Max time a non-empty batch may wait before flushing.
    pub batch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Split out from
    /// [`Config::from_env`] so tests can supply values without touching
    /// process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            signal_endpoint: required(&lookup, "SIGNAL_ENDPOINT")?,
            registered_account: required(&lookup, "REGISTERED_ACCOUNT")?,
            webhook_url: required(&lookup, "WEBHOOK_URL")?,
            auth_token: required(&lookup, "AUTH_TOKEN")?,
            authorization_whitelist: lookup("AUTHORIZATION_WHITELIST").unwrap_or_default(),
            group_cache_size: parsed(&lookup, "GROUP_CACHE_SIZE", DEFAULT_GROUP_CACHE_SIZE)?,
            timescale: TimescaleConfig {
                host: lookup("TIMESCALE_HOST")
                    .unwrap_or_else(|| DEFAULT_TIMESCALE_HOST.to_string()),
                port: parsed(&lookup, "TIMESCALE_PORT", DEFAULT_TIMESCALE_PORT)?,
                database: lookup("TIMESCALE_DATABASE")
                    .unwrap_or_else(|| DEFAULT_TIMESCALE_DATABASE.to_string()),
                username: lookup("TIMESCALE_USERNAME")
                    .unwrap_or_else(|| DEFAULT_TIMESCALE_USERNAME.to_string()),
                password: required(&lookup, "TIMESCALE_PASSWORD")?,
                batch_size: parsed(&lookup, "TIMESCALE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                batch_timeout: Duration::from_secs(parsed(
                    &lookup,
                    "TIMESCALE_BATCH_TIMEOUT_SECONDS",
                    DEFAULT_BATCH_TIMEOUT_SECS,
                )?),
            },
        })
    }

    /// REST base of the gateway, e.g. `http://signal:8080`.
    pub fn gateway_http_base(&self) -> String {
        format!("http://{}", self.signal_endpoint)
    }

    /// WebSocket receive URL for the registered account.
    pub fn receive_url(&self) -> String {
        format!(
            "ws://{}/v1/receive/{}",
            self.signal_endpoint, self.registered_account
        )
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{key} must be set"))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
