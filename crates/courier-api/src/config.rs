use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime configuration shared by the API server and the relay worker.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub broker_url: String,
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub push_timeout_secs: u64,
    pub relay_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Config {
            host: std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("COURIER_PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("invalid COURIER_PORT")?,
            db_path: std::env::var("COURIER_DB_PATH")
                .unwrap_or_else(|_| "courier.db".into())
                .into(),
            broker_url: std::env::var("COURIER_BROKER_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            token_secret: std::env::var("COURIER_TOKEN_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-me".into()),
            token_ttl_minutes: std::env::var("COURIER_TOKEN_TTL_MINUTES")
                .unwrap_or_else(|_| "60".into())
                .parse()
                .context("invalid COURIER_TOKEN_TTL_MINUTES")?,
            push_timeout_secs: std::env::var("COURIER_PUSH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .context("invalid COURIER_PUSH_TIMEOUT_SECS")?,
            relay_concurrency: std::env::var("COURIER_RELAY_CONCURRENCY")
                .unwrap_or_else(|_| "32".into())
                .parse()
                .context("invalid COURIER_RELAY_CONCURRENCY")?,
        })
    }
}
