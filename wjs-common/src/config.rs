//! Configuration loading and service endpoint resolution
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error; the coordinator starts with
//! defaults and logs a warning.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Default tournament service endpoint
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// Default per-request timeout for gateway calls (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Environment variable overriding the service endpoint
pub const SERVER_URL_ENV: &str = "WJS_SERVER_URL";
/// Environment variables supplying judge credentials
pub const USERNAME_ENV: &str = "WJS_USERNAME";
pub const PASSWORD_ENV: &str = "WJS_PASSWORD";

/// Resolved coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base URL of the tournament service (REST + live event stream)
    pub server_url: String,
    /// Judge credentials for the login call
    pub username: Option<String>,
    pub password: Option<String>,
    /// Bounded timeout applied to every gateway request
    pub request_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            username: None,
            password: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// On-disk TOML schema; every field optional so partial files work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Resolve the full configuration following the priority order above.
///
/// `cli_url` is the `--server-url` argument, `config_path` an explicit
/// `--config` file; with neither given the platform default config file is
/// tried.
pub fn resolve(cli_url: Option<&str>, config_path: Option<&Path>) -> Result<ServiceConfig> {
    let file = load_toml(config_path)?;
    let mut config = ServiceConfig::default();

    // Priority 3: TOML config file
    if let Some(url) = file.server_url {
        config.server_url = url;
    }
    config.username = file.username;
    config.password = file.password;
    if let Some(secs) = file.request_timeout_secs {
        config.request_timeout_secs = secs;
    }

    // Priority 2: environment variables
    if let Ok(url) = std::env::var(SERVER_URL_ENV) {
        config.server_url = url;
    }
    if let Ok(username) = std::env::var(USERNAME_ENV) {
        config.username = Some(username);
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        config.password = Some(password);
    }

    // Priority 1: command-line argument
    if let Some(url) = cli_url {
        config.server_url = url.to_string();
    }

    config.server_url = config.server_url.trim_end_matches('/').to_string();
    Ok(config)
}

/// Load the TOML file from the explicit path, or the platform default
/// location. A missing file yields an empty config; an unreadable or
/// unparseable file is an error only when the path was given explicitly.
fn load_toml(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_file() {
            Some(path) if path.exists() => path,
            _ => return Ok(TomlConfig::default()),
        },
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if explicit.is_none() => {
            warn!("Config file {} unreadable: {}; using defaults", path.display(), err);
            return Ok(TomlConfig::default());
        }
        Err(err) => {
            return Err(Error::Config(format!(
                "cannot read {}: {}",
                path.display(),
                err
            )))
        }
    };

    toml::from_str(&content)
        .map_err(|err| Error::Config(format!("cannot parse {}: {}", path.display(), err)))
}

/// Default configuration file path for the platform
///
/// Linux: `~/.config/wjs/config.toml`, then `/etc/wjs/config.toml`.
/// macOS/Windows: the user config directory under `wjs/config.toml`.
pub fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("wjs").join("config.toml"));

    if cfg!(target_os = "linux") {
        if let Some(path) = &user_config {
            if path.exists() {
                return user_config;
            }
        }
        let system_config = PathBuf::from("/etc/wjs/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    user_config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert!(config.username.is_none());
    }

    #[test]
    fn test_toml_partial_file() {
        let parsed: TomlConfig = toml::from_str(r#"server_url = "http://10.0.0.2:5000""#).unwrap();
        assert_eq!(parsed.server_url.as_deref(), Some("http://10.0.0.2:5000"));
        assert!(parsed.username.is_none());
    }
}
