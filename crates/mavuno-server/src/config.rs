use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mavuno_payments::{MockOptions, TransactionStatus};

/// Placeholder JWT secret used when nothing is configured.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub payhero: MockOptions,
    pub payment_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = var("MAVUNO_HOST", "0.0.0.0");
        let port: u16 = var("MAVUNO_PORT", "3000")
            .parse()
            .context("MAVUNO_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let delay_ms: u64 = var("MAVUNO_PAYHERO_DELAY_MS", "2000")
            .parse()
            .context("MAVUNO_PAYHERO_DELAY_MS must be milliseconds")?;
        let outcome = match var("MAVUNO_PAYHERO_OUTCOME", "success").to_lowercase().as_str() {
            "success" => TransactionStatus::Success,
            "failed" => TransactionStatus::Failed,
            other => bail!("MAVUNO_PAYHERO_OUTCOME must be 'success' or 'failed', got '{}'", other),
        };

        let payment_timeout: u64 = var("MAVUNO_PAYMENT_TIMEOUT_SECS", "300")
            .parse()
            .context("MAVUNO_PAYMENT_TIMEOUT_SECS must be seconds")?;
        let reconcile_interval: u64 = var("MAVUNO_RECONCILE_INTERVAL_SECS", "15")
            .parse()
            .context("MAVUNO_RECONCILE_INTERVAL_SECS must be seconds")?;
        if reconcile_interval == 0 {
            bail!("MAVUNO_RECONCILE_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            addr,
            db_path: var("MAVUNO_DB_PATH", "mavuno.db").into(),
            jwt_secret: var("MAVUNO_JWT_SECRET", DEV_JWT_SECRET),
            payhero: MockOptions {
                outcome,
                ..MockOptions::with_base_delay(Duration::from_millis(delay_ms))
            },
            payment_timeout: Duration::from_secs(payment_timeout),
            reconcile_interval: Duration::from_secs(reconcile_interval),
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.is_empty() || self.jwt_secret == DEV_JWT_SECRET
    }
}
