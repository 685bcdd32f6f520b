//! Runtime configuration types for operational parameters
//!
//! Controls where the installer finds its inputs, how it talks to the
//! network and how actions are executed.

use super::InstallMode;
use serde::{Deserialize, Serialize};

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Input and state file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Action execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// File locations
///
/// A relative `state-file` is resolved against the home directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    #[serde(default = "default_manifest_path")]
    pub manifest: String,

    #[serde(default = "default_checksums_path")]
    pub checksums: String,

    #[serde(default = "default_state_file")]
    pub state_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest_path(),
            checksums: default_checksums_path(),
            state_file: default_state_file(),
        }
    }
}

fn default_manifest_path() -> String {
    "acfs.manifest.yaml".to_string()
}
fn default_checksums_path() -> String {
    "checksums.yaml".to_string()
}
fn default_state_file() -> String {
    ".acfs/state.json".to_string()
}

/// Network and HTTP configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Installer script fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Connectivity probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// URL requested by the pre-flight connectivity probe
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            probe_url: default_probe_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    60
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_probe_url() -> String {
    "https://github.com".to_string()
}
fn default_user_agent() -> String {
    format!(
        "acfs/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Action execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionConfig {
    /// Overrides the manifest's `defaults.target_user` when set
    #[serde(default)]
    pub target_user: Option<String>,

    /// Per-action timeout; 0 disables it
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Overrides the manifest's `defaults.mode` when set
    #[serde(default)]
    pub mode: Option<InstallMode>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            target_user: None,
            action_timeout_secs: default_action_timeout(),
            mode: None,
        }
    }
}

fn default_action_timeout() -> u64 {
    1800 // 30 minutes
}

impl ExecutionConfig {
    /// Per-action timeout, `None` when disabled
    pub fn action_timeout(&self) -> Option<std::time::Duration> {
        (self.action_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.action_timeout_secs))
    }
}
