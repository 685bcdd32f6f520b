//! Common test utilities for acfs-installer
//!
//! This module provides shared test infrastructure including:
//! - Module and manifest builders
//! - Mock runners, fetchers and prompts with no side effects
//! - The reference manifest used by the scenario tests

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod builders;
pub mod fixtures;
pub mod mocks;

pub use builders::*;
pub use fixtures::*;
pub use mocks::*;
