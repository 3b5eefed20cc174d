use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::feed::reducer::DuplicatePolicy;

/// Process configuration, read once at startup from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub paseto_access_key: [u8; 32],
    pub paseto_refresh_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub refresh_ttl_days: u64,
    pub feed_duplicate_policy: DuplicatePolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_default("HTTP_ADDR", "0.0.0.0:8080");
        SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let policy_raw = env_default("FEED_DUPLICATE_POLICY", "ignore");
        let feed_duplicate_policy = DuplicatePolicy::parse(&policy_raw)
            .ok_or_else(|| anyhow!("invalid FEED_DUPLICATE_POLICY: {}", policy_raw))?;

        Ok(Self {
            http_addr,
            database_url: env_required("DATABASE_URL")?,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            paseto_access_key: env_base64_key("PASETO_ACCESS_KEY")?,
            paseto_refresh_key: env_base64_key("PASETO_REFRESH_KEY")?,
            access_ttl_minutes: env_parse("ACCESS_TTL_MINUTES", "15")?,
            refresh_ttl_days: env_parse("REFRESH_TTL_DAYS", "30")?,
            feed_duplicate_policy,
        })
    }
}

fn env_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    env_default(key, default)
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

/// Base64-decode a 32-byte symmetric key from the environment.
fn env_base64_key(key: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD
        .decode(env_required(key)?.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;

    <[u8; 32]>::try_from(decoded.as_slice())
        .map_err(|_| anyhow!("invalid {}: expected 32 bytes", key))
}
