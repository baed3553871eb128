//! Connector configuration

use crate::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reconnect backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Lower bound of every delay, in milliseconds
    pub min_ms: u64,
    /// Upper bound of every delay, in milliseconds
    pub max_ms: u64,
    pub factor: f64,
    /// Relative deviation applied to each delay, 0.0..=1.0
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_ms: 2_000,
            max_ms: 60_000,
            factor: 2.0,
            jitter: 0.75,
        }
    }
}

impl BackoffConfig {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

/// Relay connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Relay base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Instance identifier sent in the handshake
    pub uuid: String,
    /// Shared secret, inline
    #[serde(default)]
    pub secret: Option<String>,
    /// Shared secret, read from a file when `secret` is not set
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    #[serde(default = "default_openhab_version")]
    pub openhab_version: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Allow the relay to proxy requests to the local server
    #[serde(default = "default_true")]
    pub remote_access: bool,
    /// Local HTTP server that proxied requests go to
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Give up after this many failed reconnects; unlimited when unset
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_base_url() -> String {
    "https://myopenhab.org/".to_string()
}

fn default_openhab_version() -> String {
    "4.0.0".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_true() -> bool {
    true
}

fn default_local_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl CloudConfig {
    pub fn new(uuid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            uuid: uuid.into(),
            secret: Some(secret.into()),
            secret_file: None,
            openhab_version: default_openhab_version(),
            client_version: default_client_version(),
            remote_access: true,
            local_base_url: default_local_base_url(),
            request_timeout_secs: default_request_timeout(),
            backoff: BackoffConfig::default(),
            max_reconnect_attempts: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: CloudConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.uuid.trim().is_empty() {
            return Err(CloudError::Config("uuid must not be empty".to_string()));
        }
        if self.secret.is_none() && self.secret_file.is_none() {
            return Err(CloudError::Config(
                "one of secret or secret_file is required".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)?;
        url::Url::parse(&self.local_base_url)?;
        let b = &self.backoff;
        if b.min_ms == 0 || b.min_ms > b.max_ms {
            return Err(CloudError::Config(format!(
                "backoff bounds invalid: min {} ms, max {} ms",
                b.min_ms, b.max_ms
            )));
        }
        if b.factor < 1.0 || !(0.0..=1.0).contains(&b.jitter) {
            return Err(CloudError::Config(format!(
                "backoff factor {} or jitter {} out of range",
                b.factor, b.jitter
            )));
        }
        Ok(())
    }

    /// The shared secret, trimmed, from the inline value or the secret file
    pub fn secret(&self) -> Result<String> {
        match (&self.secret, &self.secret_file) {
            (Some(secret), _) => Ok(secret.trim().to_string()),
            (None, Some(path)) => Ok(std::fs::read_to_string(path)?.trim().to_string()),
            (None, None) => Err(CloudError::Config("no secret configured".to_string())),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
