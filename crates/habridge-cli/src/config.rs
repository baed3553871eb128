//! Application configuration file

use anyhow::{Context, Result};
use habridge_cloud::CloudConfig;
use habridge_insteon::{Catalog, NetworkConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Override files for the builtin feature and device-type tables
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFiles {
    pub features: PathBuf,
    pub device_types: PathBuf,
}

/// Top-level `habridge` configuration
///
/// ```toml
/// [[network.devices]]
/// address = "1A.2B.3C"
/// product_key = "F00.00.01"
///
/// [cloud]
/// uuid = "..."
/// secret_file = "/var/lib/habridge/secret"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    #[serde(default)]
    pub catalog: Option<CatalogFiles>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Load `path`, or the default location if it exists, or an empty config
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = default_config_file();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn catalog(&self) -> Result<Catalog> {
        match &self.catalog {
            None => Catalog::builtin().context("Builtin catalog is invalid"),
            Some(files) => {
                let features = std::fs::read_to_string(&files.features).with_context(|| {
                    format!("Failed to read feature table {}", files.features.display())
                })?;
                let devices = std::fs::read_to_string(&files.device_types).with_context(|| {
                    format!(
                        "Failed to read device-type table {}",
                        files.device_types.display()
                    )
                })?;
                Catalog::from_toml(&features, &devices).context("Invalid catalog tables")
            }
        }
    }
}

/// Get the default config file path
pub fn default_config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("habridge")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [[network.devices]]
            address = "1A.2B.3C"
            product_key = "F00.00.24"
            config = { heartbeatOnly = true }

            [[network.devices]]
            address = "B.7"
            product_key = "X00.00.01"

            [cloud]
            uuid = "abc"
            secret = "def"
            max_reconnect_attempts = 5

            [cloud.backoff]
            min_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.network.devices.len(), 2);
        assert!(config.network.devices[0].config.heartbeat_only);
        assert!(config.network.devices[1].address.is_x10());
        let cloud = config.cloud.unwrap();
        assert_eq!(cloud.backoff.min_ms, 1000);
        assert_eq!(cloud.backoff.max_ms, 60_000);
        assert_eq!(cloud.max_reconnect_attempts, Some(5));
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_empty_config_uses_builtin_catalog() {
        let config = AppConfig::default();
        let catalog = config.catalog().unwrap();
        assert!(catalog.device_type("F00.00.01").is_some());
    }
}
