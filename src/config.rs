use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 15;
pub const DEFAULT_REFRESH_TOKEN_MINUTES: i64 = 60;
pub const DEFAULT_SESSION_MINUTES: i64 = 60;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// Server configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    /// Minutes.
    pub access_token_expires_in: i64,
    /// Minutes.
    pub refresh_token_expires_in: i64,
    /// Minutes a session stays in the cache after login.
    pub session_expires_in: i64,
    pub production: bool,
    pub password_hash_rounds: u32,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing environment variable {name}"))
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("parse {name}")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .with_context(|| "parse BIND_ADDR")?;
        let production = std::env::var("APP_ENV")
            .map(|env| env.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        Ok(Self {
            bind_addr,
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed_or(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            access_token_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_token_secret: required("REFRESH_TOKEN_SECRET")?,
            access_token_expires_in: parsed_or(
                "ACCESS_TOKEN_EXPIRES_IN",
                DEFAULT_ACCESS_TOKEN_MINUTES,
            )?,
            refresh_token_expires_in: parsed_or(
                "REFRESH_TOKEN_EXPIRES_IN",
                DEFAULT_REFRESH_TOKEN_MINUTES,
            )?,
            session_expires_in: parsed_or("REDIS_CACHE_EXPIRES_IN", DEFAULT_SESSION_MINUTES)?,
            production,
            password_hash_rounds: parsed_or(
                "PASSWORD_HASH_ROUNDS",
                pbkdf2::Params::default().rounds,
            )?,
        })
    }

    pub fn session_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_expires_in.max(1) as u64 * 60)
    }
}
