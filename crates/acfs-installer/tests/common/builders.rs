//! Module and manifest builders for creating test fixtures

#![allow(dead_code)]

use acfs_core::types::{
    Action, Criticality, InstallerEntry, InstallerRef, ManifestDefaults, Module, Probe, RunAs,
    ScriptRunner,
};
use acfs_core::{ChecksumRegistry, Manifest};

/// Builder for creating Module test fixtures
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// A module with one shell install step named after its id
    pub fn new(id: &str, phase: u8) -> Self {
        Self {
            module: Module {
                id: id.to_string(),
                description: format!("Test module {}", id),
                phase,
                tags: Default::default(),
                dependencies: Vec::new(),
                run_as: RunAs::TargetUser,
                install: vec![Action::Shell(format!("install {}", id))],
                verify: Vec::new(),
                installed_check: None,
                optional: false,
                enabled_by_default: true,
            },
        }
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.module.dependencies.push(dependency.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.module.tags.insert(tag.to_string());
        self
    }

    pub fn run_as(mut self, run_as: RunAs) -> Self {
        self.module.run_as = run_as;
        self
    }

    /// Replace the install steps with shell bodies
    pub fn install(mut self, bodies: &[&str]) -> Self {
        self.module.install = bodies.iter().map(|b| Action::Shell(b.to_string())).collect();
        self
    }

    /// Replace the install steps with one verified installer
    pub fn verified_installer(mut self, tool: &str) -> Self {
        self.module.install = vec![Action::VerifiedInstaller(InstallerRef {
            tool: tool.to_string(),
            runner: ScriptRunner::Bash,
            args: Vec::new(),
        })];
        self
    }

    pub fn verify(mut self, bodies: &[&str]) -> Self {
        self.module.verify = bodies.iter().map(|b| Action::Shell(b.to_string())).collect();
        self
    }

    pub fn installed_check(mut self, command: &str) -> Self {
        self.module.installed_check = Some(Probe {
            command: command.to_string(),
            run_as: None,
        });
        self
    }

    pub fn optional(mut self) -> Self {
        self.module.optional = true;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.module.enabled_by_default = false;
        self
    }

    pub fn build(self) -> Module {
        self.module
    }
}

/// Builder for creating validated manifests
#[derive(Default)]
pub struct ManifestBuilder {
    modules: Vec<Module>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: ModuleBuilder) -> Self {
        self.modules.push(module.build());
        self
    }

    pub fn build(self) -> Manifest {
        Manifest::new(1, "test", ManifestDefaults::default(), self.modules)
            .expect("test manifest must validate")
    }
}

/// Builder for checksum registries
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, InstallerEntry)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installer(mut self, tool: &str, sha256: &str, criticality: Criticality) -> Self {
        self.entries.push((
            tool.to_string(),
            InstallerEntry {
                url: installer_url(tool),
                sha256: sha256.to_string(),
                criticality,
            },
        ));
        self
    }

    pub fn build(self) -> ChecksumRegistry {
        ChecksumRegistry::from_entries(self.entries).expect("test registry must validate")
    }
}

/// Canonical test URL for `tool`
pub fn installer_url(tool: &str) -> String {
    format!("https://installers.example.com/{}/install.sh", tool)
}
