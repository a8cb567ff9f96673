use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub listen: String,
    /// Directory the job queue persists its state into.
    pub state_dir: PathBuf,
    /// A worker lease whose heartbeat is older than this is considered dead.
    pub heartbeat_timeout: Duration,
    /// How often the stale-lease watchdog sweeps.
    pub watchdog_interval: Duration,
    /// Number of in-process workers to run.
    pub local_workers: usize,
    /// External helper programs (JSON over stdio).
    pub depsolver_command: Option<PathBuf>,
    pub manifest_command: Option<PathBuf>,
    pub osbuild_command: Option<PathBuf>,
    pub koji_command: Option<PathBuf>,
}

fn duration_var(name: &str, default_secs: u64) -> Result<Duration> {
    let secs = match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a number of seconds", name))?,
        Err(_) => default_secs,
    };
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            listen: env::var("COMPOSER_LISTEN").unwrap_or_else(|_| "0.0.0.0:8700".to_string()),
            state_dir: env::var("COMPOSER_STATE_DIR")
                .unwrap_or_else(|_| "composer-state".to_string())
                .into(),
            heartbeat_timeout: duration_var("COMPOSER_HEARTBEAT_TIMEOUT_SECS", 120)?,
            watchdog_interval: duration_var("COMPOSER_WATCHDOG_INTERVAL_SECS", 30)?,
            local_workers: env::var("COMPOSER_LOCAL_WORKERS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("COMPOSER_LOCAL_WORKERS must be a number")?,
            depsolver_command: env::var("COMPOSER_DEPSOLVER_CMD").ok().map(Into::into),
            manifest_command: env::var("COMPOSER_MANIFEST_CMD").ok().map(Into::into),
            osbuild_command: env::var("COMPOSER_OSBUILD_CMD").ok().map(Into::into),
            koji_command: env::var("COMPOSER_KOJI_CMD").ok().map(Into::into),
        })
    }
}
