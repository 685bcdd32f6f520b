//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. User config (~/.acfs/config.yaml)
//! 3. Environment variables (ACFS_* prefix)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::{InstallMode, RuntimeConfig};
use crate::utils::get_home_dir;
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use tracing::debug;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const USER_CONFIG_FILE: &str = "config.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at ~/.acfs
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = get_home_dir().map_err(|e| Error::invalid_config(e.to_string()))?;
        let home = Utf8PathBuf::from_path_buf(home).map_err(|p| {
            Error::invalid_config(format!("Non UTF-8 home directory: {}", p.display()))
        })?;
        Ok(home.join(".acfs"))
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = Self::load_embedded_config::<RuntimeConfig>("runtime-defaults.yaml")?;

        let user_config_path = self.config_dir.join(USER_CONFIG_FILE);
        if user_config_path.exists() {
            let file_config = self.load_yaml_file::<RuntimeConfig>(&user_config_path)?;
            config = Self::merge_runtime_config(config, file_config);
            debug!("Applied user config from {}", user_config_path);
        }

        self.apply_env_overrides(config)
    }

    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Merge two runtime configs (base is overridden by overlay)
    ///
    /// Sections are replaced wholesale; the optional execution overrides fall
    /// back to the base when the overlay leaves them unset.
    fn merge_runtime_config(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
        let mut execution = overlay.execution;
        if execution.target_user.is_none() {
            execution.target_user = base.execution.target_user;
        }
        if execution.mode.is_none() {
            execution.mode = base.execution.mode;
        }

        RuntimeConfig {
            paths: overlay.paths,
            network: overlay.network,
            execution,
        }
    }

    fn apply_env_overrides(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        // Paths
        if let Ok(val) = env::var("ACFS_MANIFEST") {
            config.paths.manifest = val;
        }

        if let Ok(val) = env::var("ACFS_CHECKSUMS") {
            config.paths.checksums = val;
        }

        if let Ok(val) = env::var("ACFS_STATE_FILE") {
            config.paths.state_file = val;
        }

        // Network
        if let Ok(val) = env::var("ACFS_FETCH_TIMEOUT_SECS") {
            config.network.fetch_timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("ACFS_FETCH_TIMEOUT_SECS must be a valid number")
            })?;
        }

        if let Ok(val) = env::var("ACFS_PROBE_TIMEOUT_SECS") {
            config.network.probe_timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("ACFS_PROBE_TIMEOUT_SECS must be a valid number")
            })?;
        }

        if let Ok(val) = env::var("ACFS_PROBE_URL") {
            config.network.probe_url = val;
        }

        // Execution
        if let Ok(val) = env::var("ACFS_TARGET_USER") {
            config.execution.target_user = Some(val);
        }

        if let Ok(val) = env::var("ACFS_ACTION_TIMEOUT_SECS") {
            config.execution.action_timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("ACFS_ACTION_TIMEOUT_SECS must be a valid number")
            })?;
        }

        if let Ok(val) = env::var("ACFS_MODE") {
            config.execution.mode = Some(val.parse::<InstallMode>().map_err(Error::invalid_config)?);
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Resolve a configured path
    ///
    /// `~` and `~/...` expand to the home directory; other relative paths
    /// hang off it.
    pub fn resolve_home_relative(path: &str) -> Result<Utf8PathBuf> {
        if Utf8Path::new(path).is_absolute() {
            return Ok(Utf8PathBuf::from(path));
        }
        let relative = match path.strip_prefix('~') {
            Some("") => "",
            Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/'),
            _ => path,
        };
        let home = get_home_dir().map_err(|e| Error::invalid_config(e.to_string()))?;
        let home = Utf8PathBuf::from_path_buf(home).map_err(|p| {
            Error::invalid_config(format!("Non UTF-8 home directory: {}", p.display()))
        })?;
        Ok(if relative.is_empty() {
            home
        } else {
            home.join(relative)
        })
    }
}
