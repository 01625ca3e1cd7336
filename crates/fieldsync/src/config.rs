//! Configuration for the offline queue, passed in by the embedding app as JSON.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secrets::{self, SecretError};

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]{0,62}$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    /// SQLite file for the local store. Defaults to `~/.fieldsync/data/fieldsync.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Upper bound for one delivery attempt (uploads plus insert).
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Drain the queue automatically when connectivity returns.
    #[serde(default = "default_true")]
    pub drain_on_reconnect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_registrations_table")]
    pub registrations_table: String,
    #[serde(default = "default_catalog_table")]
    pub catalog_table: String,
    #[serde(default = "default_attachments_bucket")]
    pub attachments_bucket: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_delivery_timeout_secs() -> u64 {
    45
}

fn default_api_key_env_var() -> Option<String> {
    Some("FIELDSYNC_API_KEY".to_string())
}

fn default_registrations_table() -> String {
    "clientes".to_string()
}

fn default_catalog_table() -> String {
    "cursos".to_string()
}

fn default_attachments_bucket() -> String {
    "evidencias".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl SyncConfig {
    /// Config with defaults for everything but the remote URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            remote: RemoteConfig::new(base_url),
            database_path: None,
            delivery_timeout_secs: default_delivery_timeout_secs(),
            drain_on_reconnect: true,
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    /// The configured database path, or the per-user default.
    pub fn resolve_database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::db::default_database_path().ok_or(ConfigError::NoDatabasePath),
        }
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            registrations_table: default_registrations_table(),
            catalog_table: default_catalog_table(),
            attachments_bucket: default_attachments_bucket(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolves the API key from the configured sources.
    pub fn resolve_api_key(&self) -> Result<SecretString, SecretError> {
        secrets::resolve_secret(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env_var.as_deref(),
        )
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    let remote = &config.remote;

    let url = reqwest::Url::parse(&remote.base_url).map_err(|e| ConfigError::Validation {
        message: format!("Invalid remote base_url '{}': {}", remote.base_url, e),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported URL scheme '{}'", url.scheme()),
        });
    }

    for (field, value) in [
        ("registrations_table", &remote.registrations_table),
        ("catalog_table", &remote.catalog_table),
        ("attachments_bucket", &remote.attachments_bucket),
    ] {
        if !RE_IDENTIFIER.is_match(value) {
            return Err(ConfigError::Validation {
                message: format!("Invalid {} '{}'", field, value),
            });
        }
    }

    for (field, value) in [
        ("connect_timeout_secs", remote.connect_timeout_secs),
        ("request_timeout_secs", remote.request_timeout_secs),
        ("delivery_timeout_secs", config.delivery_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", field),
            });
        }
    }

    if !secrets::has_secret_source(
        remote.api_key.as_deref(),
        remote.api_key_file.as_deref(),
        remote.api_key_env_var.as_deref(),
    ) {
        return Err(ConfigError::Validation {
            message: "No API key source configured".to_string(),
        });
    }

    Ok(())
}
