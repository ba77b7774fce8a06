//! TOML configuration. Every section and field has a default, so an empty
//! file yields a working embedded setup.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
    pub provisioning: ProvisioningConfig,
    pub catalog: CatalogConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `mem://` for the embedded engine, `ws://host:port` for a remote one.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DatabaseConfig {
    /// True for the embedded engine, whose data is gone when the process exits.
    pub fn is_ephemeral(&self) -> bool {
        self.endpoint.trim_start().starts_with("mem://")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "gobet".to_string(),
            database: "gobet".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub login_domain: String,
    pub session_ttl_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            login_domain: "gobet.local".to_string(),
            session_ttl_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Login identifier that gets an administrator profile on first sign-in.
    pub admin_identifier: String,
    pub admin_username: String,
    pub admin_seed_balance: u64,
    /// Balance given to accounts an administrator creates.
    pub opening_balance: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            admin_identifier: "admin@gobet.local".to_string(),
            admin_username: "admin".to_string(),
            admin_seed_balance: 10_000,
            opening_balance: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    pub games_host: String,
    pub odds_host: String,
    pub api_key: Option<String>,
    pub fallback_stream_url: String,
    pub request_timeout_secs: u64,
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            games_host: "slot-and-betting-games.p.rapidapi.com".to_string(),
            odds_host: "betfair-sports-casino-live-tv-result-odds.p.rapidapi.com".to_string(),
            api_key: None,
            fallback_stream_url: "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database.endpoint, "mem://");
        assert_eq!(config.provisioning.admin_identifier, "admin@gobet.local");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [database]
            endpoint = "ws://127.0.0.1:8000"
            username = "root"
            password = "root"

            [provisioning]
            admin_seed_balance = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.database.endpoint, "ws://127.0.0.1:8000");
        assert_eq!(config.database.namespace, "gobet");
        assert_eq!(config.database.username.as_deref(), Some("root"));
        assert_eq!(config.provisioning.admin_seed_balance, 500);
        assert_eq!(config.provisioning.admin_username, "admin");
        assert_eq!(config.catalog.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn only_the_embedded_engine_is_ephemeral() {
        assert!(DatabaseConfig::default().is_ephemeral());
        let remote = DatabaseConfig {
            endpoint: "ws://127.0.0.1:8000".into(),
            ..DatabaseConfig::default()
        };
        assert!(!remote.is_ephemeral());
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml_str("[database"),
            Err(ConfigError::Parse(_))
        ));
    }
}
