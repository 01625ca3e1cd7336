//! Secret resolution for the remote store API key.
//!
//! Sources are tried in priority order:
//!
//! 1. **Direct value** - for local testing (`"api_key": "..."`)
//! 2. **File reference** - Docker secrets pattern (`"api_key_file": "/run/secrets/key"`)
//! 3. **Env var reference** - production (`"api_key_env_var": "FIELDSYNC_API_KEY"`)

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret contains characters that are not allowed in an HTTP header")]
    NotHeaderSafe,
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first source that is present and non-empty.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return match fs::read_to_string(&expanded) {
            Ok(content) => Ok(SecretString::from(content.trim().to_string())),
            Err(e) => Err(SecretError::FileReadError {
                path: expanded,
                source: e,
            }),
        };
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            // Env vars may carry a trailing newline.
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
