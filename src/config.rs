use std::env;

use anyhow::{Context, Result};

/// Runtime configuration loaded from the environment (`.env` file).
///
/// Mirrors the fields the original tracker exposed as `config` members:
/// batching cadence, peer timeouts, the numwant bounds, the announce
/// interval, and the shared admin secret used to authorize the control
/// plane.
#[derive(Clone)]
pub struct Config {
    /// Address the raw TCP listener binds to.
    pub listen_addr: String,
    /// MySQL connection string for the authoritative store.
    pub database_url: String,
    /// Passkey-equivalent shared secret that authorizes `update` requests.
    pub site_password: String,
    /// Seconds a peer may go without announcing before the reaper evicts it.
    pub peers_timeout: i64,
    /// Seconds between reaper sweeps.
    pub reap_interval: u64,
    /// Seconds between forced flushes of all six record buffers.
    pub flush_interval: u64,
    /// Default `numwant` when the client omits it.
    pub numwant_default: usize,
    /// Maximum `numwant` a client may request.
    pub numwant_max: usize,
    /// `min interval` returned to clients, and base of the `interval` field.
    pub announce_interval: u32,
    /// Minimum upload speed (bytes/sec) required to emit a peer-history record.
    pub keep_speed: u64,
    /// Upper clamp applied to any single upload/download delta.
    pub max_bytes_transferred: u64,
}

impl Config {
    /// Loads configuration from environment variables, applying the same
    /// defaults the original tracker shipped with.
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:34000".to_string()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL not set.")?,
            site_password: env::var("SITE_PASSWORD").context("SITE_PASSWORD not set.")?,
            peers_timeout: parse_env_or("PEERS_TIMEOUT", 3_600)?,
            reap_interval: parse_env_or("REAP_INTERVAL", 1_800)?,
            flush_interval: parse_env_or("FLUSH_INTERVAL", 3)?,
            numwant_default: parse_env_or("NUMWANT_DEFAULT", 50)?,
            numwant_max: parse_env_or("NUMWANT_MAX", 50)?,
            announce_interval: parse_env_or("ANNOUNCE_INTERVAL", 1_800)?,
            keep_speed: parse_env_or("KEEP_SPEED", 1_024)?,
            max_bytes_transferred: parse_env_or("MAX_BYTES_TRANSFERRED", 999_999_999_999_999)?,
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("Failed to parse {key}.")),
        Err(_) => Ok(default),
    }
}
