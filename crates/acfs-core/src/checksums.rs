//! Checksum registry for upstream installer scripts
//!
//! Loaded once per run and never mutated. Every entry has an `https` URL and a
//! 64 hex digit SHA-256, normalised to lowercase.

use crate::error::{Error, Result, ValidationError};
use crate::manifest::Manifest;
use crate::types::{ChecksumsFile, Criticality, InstallerEntry};
use camino::Utf8Path;
use std::collections::BTreeMap;
use std::fs;
use tracing::debug;
use url::Url;

/// Read-only tool → known-good fingerprint map
#[derive(Debug, Clone, Default)]
pub struct ChecksumRegistry {
    entries: BTreeMap<String, InstallerEntry>,
}

impl ChecksumRegistry {
    /// Load the registry from `checksums.yaml`
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::config_not_found(path.as_str()));
        }
        let content = fs::read_to_string(path)?;
        let registry = Self::from_yaml(&content)?;
        debug!("Loaded {} installer checksums from {}", registry.len(), path);
        Ok(registry)
    }

    /// Parse and validate registry YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ChecksumsFile = serde_yaml_ng::from_str(content)?;
        Self::from_entries(file.installers).map_err(Error::from)
    }

    /// Build a registry from already-parsed entries
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, InstallerEntry)>,
    ) -> std::result::Result<Self, ValidationError> {
        let mut validated = BTreeMap::new();
        for (tool, mut entry) in entries {
            validate_entry(&tool, &entry)?;
            entry.sha256 = entry.sha256.to_ascii_lowercase();
            validated.insert(tool, entry);
        }
        Ok(Self { entries: validated })
    }

    pub fn get(&self, tool: &str) -> Option<&InstallerEntry> {
        self.entries.get(tool)
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.entries.contains_key(tool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool names, sorted
    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn criticality(&self, tool: &str) -> Option<Criticality> {
        self.entries.get(tool).map(|e| e.criticality)
    }

    /// Every verified installer named in the manifest must have an entry
    pub fn validate_references(
        &self,
        manifest: &Manifest,
    ) -> std::result::Result<(), ValidationError> {
        for module in manifest.modules() {
            for installer in module.installer_refs() {
                if !self.contains(&installer.tool) {
                    return Err(ValidationError::MissingChecksum {
                        module: module.id.clone(),
                        tool: installer.tool.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn validate_entry(tool: &str, entry: &InstallerEntry) -> std::result::Result<(), ValidationError> {
    let invalid = |message: String| ValidationError::InvalidChecksumEntry {
        tool: tool.to_string(),
        message,
    };

    let url = Url::parse(&entry.url).map_err(|e| invalid(format!("invalid url: {}", e)))?;
    if url.scheme() != "https" {
        return Err(invalid(format!(
            "url must use https, got '{}'",
            url.scheme()
        )));
    }

    if entry.sha256.len() != 64 || !entry.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("sha256 must be 64 hex digits".to_string()));
    }

    Ok(())
}
