//! CLI command implementations

pub mod install;
pub mod modules;
pub mod plan;
pub mod reset;
pub mod status;

use acfs_core::types::RuntimeConfig;
use acfs_core::{ChecksumRegistry, HierarchicalConfigLoader, Manifest, ManifestFile};
use acfs_installer::StateStore;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::debug;

use crate::cli::Cli;

/// Resolved configuration and input locations for one invocation
pub struct Workspace {
    pub config: RuntimeConfig,
    pub manifest_path: Utf8PathBuf,
    pub checksums_path: Utf8PathBuf,
    pub state_path: Utf8PathBuf,
}

impl Workspace {
    /// Layer CLI flags over the hierarchical runtime config
    pub fn load(cli: &Cli) -> Result<Self> {
        let loader = HierarchicalConfigLoader::new().context("Failed to locate config directory")?;
        let config = loader
            .load_runtime_config()
            .context("Failed to load runtime configuration")?;

        let manifest_path = cli
            .manifest
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(&config.paths.manifest));
        let checksums_path = cli
            .checksums
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(&config.paths.checksums));
        let state_path = match &cli.state_file {
            Some(path) => path.clone(),
            None => HierarchicalConfigLoader::resolve_home_relative(&config.paths.state_file)
                .context("Failed to resolve state file path")?,
        };

        debug!(
            "Manifest: {}, checksums: {}, state: {}",
            manifest_path, checksums_path, state_path
        );
        Ok(Self {
            config,
            manifest_path,
            checksums_path,
            state_path,
        })
    }

    pub fn manifest(&self) -> Result<Manifest> {
        ManifestFile::from_path(&self.manifest_path)
            .with_context(|| format!("Failed to load manifest {}", self.manifest_path))
    }

    /// Load the registry and check every installer the manifest references
    ///
    /// A manifest without verified installers needs no registry file.
    pub fn checksums(&self, manifest: &Manifest) -> Result<ChecksumRegistry> {
        let needs_registry = manifest
            .modules()
            .iter()
            .any(|m| m.installer_refs().next().is_some());
        if !needs_registry && !self.checksums_path.exists() {
            return Ok(ChecksumRegistry::default());
        }

        let registry = ChecksumRegistry::load(&self.checksums_path)
            .with_context(|| format!("Failed to load checksums {}", self.checksums_path))?;
        registry
            .validate_references(manifest)
            .map_err(acfs_core::Error::from)
            .context("Manifest references installers missing from the checksum registry")?;
        Ok(registry)
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(self.state_path.clone())
    }
}
