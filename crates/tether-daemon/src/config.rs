//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tether_engine::ReconcilerConfig;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub engine: ReconcilerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the API server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Path to the bluetoothctl binary
    #[serde(default = "default_probe_binary")]
    pub binary: String,
    /// Per-probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            binary: default_probe_binary(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_probe_binary() -> String {
    "bluetoothctl".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    tether_probe::bluez::DEFAULT_PROBE_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path to the registry snapshot file
    #[serde(default = "default_registry_path")]
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> String {
    "./tether-registry.json".to_string()
}

/// Shared-secret authentication for the API, two privilege levels.
/// With `require_auth` on (the default), a request for a level whose
/// secret is not configured is refused, never allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether the API requires authentication
    #[serde(default = "default_true")]
    pub require_auth: bool,
    /// Secret for read-only access
    #[serde(default)]
    pub view_secret: Option<String>,
    /// Secret for management access (implies view)
    #[serde(default)]
    pub manage_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            view_secret: None,
            manage_secret: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
