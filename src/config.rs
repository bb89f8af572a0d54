// src/config.rs

use clap::Parser;
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf};
use thiserror::Error;
use tracing::info;
use url::Url;

const ENV_PREFIX: &str = "QUOTA_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),
    #[error("Both QUOTA_CERT_PATH and QUOTA_KEY_PATH must be set for TLS (only {0} given)")]
    PartialTls(&'static str),
    #[error("UTC offset of {0} minutes is out of range")]
    UtcOffset(i32),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub notify_webhook_url: Option<Url>,
    /// Office wall-clock offset; 330 is Asia/Kolkata.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_lock_sweep_secs")]
    pub lock_sweep_secs: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_utc_offset_minutes() -> i32 {
    330
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lock_sweep_secs() -> u64 {
    600
}

/// Command line overrides on top of the environment.
#[derive(Debug, Parser)]
#[command(name = "leave-quota-core", about = "Permission and WFH quota service")]
pub struct Cli {
    /// Address to listen on, e.g. 0.0.0.0:3000
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// tracing filter directive, e.g. "debug" or "leave_quota_core=debug"
    #[arg(long)]
    pub log_level: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: AppConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses from an explicit key/value list, same rules as the environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: AppConfig = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.cert_path, &self.key_path) {
            (Some(_), None) => return Err(ConfigError::PartialTls("cert path")),
            (None, Some(_)) => return Err(ConfigError::PartialTls("key path")),
            _ => {}
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::UtcOffset(self.utc_offset_minutes));
        }
        Ok(())
    }

    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(bind) = cli.bind {
            info!("Bind address overridden from command line: {}", bind);
            self.bind_addr = bind;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        self
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.cert_path.as_ref().zip(self.key_path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_pairs(pairs(&[])).unwrap();
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.utc_offset_minutes, 330);
        assert_eq!(config.log_level, "info");
        assert!(config.tls_paths().is_none());
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn reads_prefixed_values() {
        let config = AppConfig::from_pairs(pairs(&[
            ("QUOTA_BIND_ADDR", "0.0.0.0:8080"),
            ("QUOTA_NOTIFY_WEBHOOK_URL", "https://hooks.example.com/quota"),
            ("QUOTA_UTC_OFFSET_MINUTES", "-300"),
            ("QUOTA_CERT_PATH", "/etc/quota/cert.pem"),
            ("QUOTA_KEY_PATH", "/etc/quota/key.pem"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(
            config.notify_webhook_url.as_ref().unwrap().host_str(),
            Some("hooks.example.com")
        );
        assert_eq!(config.utc_offset_minutes, -300);
        assert!(config.tls_paths().is_some());
    }

    #[test]
    fn half_configured_tls_is_rejected() {
        let err = AppConfig::from_pairs(pairs(&[("QUOTA_CERT_PATH", "/tmp/cert.pem")])).unwrap_err();
        assert!(matches!(err, ConfigError::PartialTls(_)));
    }

    #[test]
    fn cli_overrides_environment() {
        let cli = Cli::parse_from(["leave-quota-core", "--bind", "127.0.0.1:9999", "--log-level", "debug"]);
        let config = AppConfig::from_pairs(pairs(&[])).unwrap().apply_cli(&cli);
        assert_eq!(config.bind_addr.port(), 9999);
        assert_eq!(config.log_level, "debug");
    }
}
