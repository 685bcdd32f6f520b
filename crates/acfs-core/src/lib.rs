//! # acfs-core
//!
//! Core library for the ACFS installer providing:
//! - The validated module manifest (`acfs.manifest.yaml`)
//! - The upstream installer checksum registry (`checksums.yaml`)
//! - The shared error taxonomy
//! - Hierarchical runtime configuration

pub mod checksums;
pub mod config;
pub mod error;
pub mod manifest;
pub mod types;
pub mod utils;

pub use checksums::ChecksumRegistry;
pub use config::HierarchicalConfigLoader;
pub use error::{Error, FieldError, Result, SelectionError, ValidationError};
pub use manifest::{Manifest, ManifestFile};
pub use utils::get_home_dir;
