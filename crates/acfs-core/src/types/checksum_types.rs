//! Checksum registry file layout

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How hard a checksum mismatch fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Mismatch is always fatal
    Critical,
    /// Mismatch may be skipped
    #[default]
    Recommended,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criticality::Critical => write!(f, "critical"),
            Criticality::Recommended => write!(f, "recommended"),
        }
    }
}

/// Known-good fingerprint of one upstream installer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerEntry {
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub criticality: Criticality,
}

/// Raw `checksums.yaml` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumsFile {
    #[serde(default)]
    pub installers: BTreeMap<String, InstallerEntry>,
}
