//! Type definitions for the ACFS manifest, checksum registry and runtime config

mod checksum_types;
mod module_types;
mod runtime_config;

pub use checksum_types::*;
pub use module_types::*;
pub use runtime_config::*;
