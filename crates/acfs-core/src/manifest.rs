//! Validated, immutable module graph
//!
//! [`Manifest::new`] is the only way to obtain a manifest, and it refuses to
//! build one that breaks any graph invariant. Everything downstream (selection,
//! execution) relies on the guarantees established here:
//!
//! 1. ids are well-formed, phases are within 1..=10
//! 2. ids are unique
//! 3. every dependency exists and no module depends on itself
//! 4. the dependency graph is acyclic
//! 5. a dependency never lives in a later phase than its dependent
//! 6. declaration order is phase-monotonic and dependencies are declared first
//!
//! Rule 6 means declaration order is already a valid topological order.

use crate::error::{Error, FieldError, Result, ValidationError};
use crate::types::{Action, ManifestDefaults, Module};
use camino::Utf8Path;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::OnceLock;
use tracing::debug;

pub const MIN_PHASE: u8 = 1;
pub const MAX_PHASE: u8 = 10;

fn id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*(\.[a-z0-9][a-z0-9_-]*)+$").ok())
        .as_ref()
}

/// Whether `id` is a dotted lowercase module identifier
pub fn is_valid_module_id(id: &str) -> bool {
    id_pattern().is_some_and(|re| re.is_match(id))
}

/// The validated module graph
#[derive(Debug, Clone)]
pub struct Manifest {
    version: u32,
    name: String,
    defaults: ManifestDefaults,
    modules: Vec<Module>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Build a manifest, checking every invariant in order
    pub fn new(
        version: u32,
        name: impl Into<String>,
        defaults: ManifestDefaults,
        modules: Vec<Module>,
    ) -> std::result::Result<Self, ValidationError> {
        check_ids_and_phases(&modules)?;
        let index = build_index(&modules)?;
        check_dependencies_exist(&modules, &index)?;
        check_acyclic(&modules, &index)?;
        check_phase_inversion(&modules, &index)?;
        check_declaration_order(&modules, &index)?;

        Ok(Self {
            version,
            name: name.into(),
            defaults,
            modules,
            index,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &ManifestDefaults {
        &self.defaults
    }

    /// Modules in declaration order
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Declaration position of a module
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Modules that list `id` as a direct dependency
    pub fn dependents_of(&self, id: &str) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|m| m.dependencies.iter().any(|d| d == id))
            .collect()
    }

    pub fn in_phase(&self, phase: u8) -> Vec<&Module> {
        self.modules.iter().filter(|m| m.phase == phase).collect()
    }

    pub fn with_tag(&self, tag: &str) -> Vec<&Module> {
        self.modules.iter().filter(|m| m.has_tag(tag)).collect()
    }

    pub fn in_category(&self, category: &str) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|m| m.category() == category)
            .collect()
    }

    /// Distinct phases, ascending
    pub fn phases(&self) -> Vec<u8> {
        let phases: BTreeSet<u8> = self.modules.iter().map(|m| m.phase).collect();
        phases.into_iter().collect()
    }

    /// Distinct categories, sorted
    pub fn categories(&self) -> Vec<&str> {
        let categories: BTreeSet<&str> = self.modules.iter().map(|m| m.category()).collect();
        categories.into_iter().collect()
    }

    /// Distinct tags, sorted
    pub fn tags(&self) -> Vec<&str> {
        let tags: BTreeSet<&str> = self
            .modules
            .iter()
            .flat_map(|m| m.tags.iter().map(String::as_str))
            .collect();
        tags.into_iter().collect()
    }
}

fn check_ids_and_phases(modules: &[Module]) -> std::result::Result<(), ValidationError> {
    for module in modules {
        if !is_valid_module_id(&module.id) {
            return Err(ValidationError::InvalidId {
                module: module.id.clone(),
            });
        }
        if !(MIN_PHASE..=MAX_PHASE).contains(&module.phase) {
            return Err(ValidationError::PhaseOutOfRange {
                module: module.id.clone(),
                phase: module.phase,
            });
        }
    }
    Ok(())
}

fn build_index(modules: &[Module]) -> std::result::Result<HashMap<String, usize>, ValidationError> {
    let mut index = HashMap::with_capacity(modules.len());
    for (i, module) in modules.iter().enumerate() {
        if index.insert(module.id.clone(), i).is_some() {
            return Err(ValidationError::DuplicateId {
                module: module.id.clone(),
            });
        }
    }
    Ok(index)
}

fn check_dependencies_exist(
    modules: &[Module],
    index: &HashMap<String, usize>,
) -> std::result::Result<(), ValidationError> {
    for module in modules {
        for dep in &module.dependencies {
            if dep == &module.id {
                return Err(ValidationError::SelfDependency {
                    module: module.id.clone(),
                });
            }
            if !index.contains_key(dep) {
                return Err(ValidationError::UnknownDependency {
                    module: module.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Iterative three-colour DFS; the first back edge found is reported with
/// the full path that closes the cycle.
fn check_acyclic(
    modules: &[Module],
    index: &HashMap<String, usize>,
) -> std::result::Result<(), ValidationError> {
    let mut marks = vec![Mark::Unvisited; modules.len()];

    for root in 0..modules.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (module index, next dependency to look at)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnPath;

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let deps = &modules[node].dependencies;

            if next >= deps.len() {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let Some(&dep) = index.get(&deps[next]) else {
                continue;
            };
            match marks[dep] {
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[dep] = Mark::OnPath;
                    stack.push((dep, 0));
                }
                Mark::OnPath => {
                    let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut chain: Vec<String> = stack[start..]
                        .iter()
                        .map(|&(n, _)| modules[n].id.clone())
                        .collect();
                    chain.push(modules[dep].id.clone());
                    return Err(ValidationError::DependencyCycle { chain });
                }
            }
        }
    }
    Ok(())
}

fn check_phase_inversion(
    modules: &[Module],
    index: &HashMap<String, usize>,
) -> std::result::Result<(), ValidationError> {
    for module in modules {
        for dep in &module.dependencies {
            let Some(&i) = index.get(dep) else { continue };
            let dependency = &modules[i];
            if dependency.phase > module.phase {
                return Err(ValidationError::PhaseInversion {
                    module: module.id.clone(),
                    phase: module.phase,
                    dependency: dependency.id.clone(),
                    dependency_phase: dependency.phase,
                });
            }
        }
    }
    Ok(())
}

fn check_declaration_order(
    modules: &[Module],
    index: &HashMap<String, usize>,
) -> std::result::Result<(), ValidationError> {
    let mut previous_phase = MIN_PHASE;
    for (position, module) in modules.iter().enumerate() {
        if module.phase < previous_phase {
            return Err(ValidationError::PhaseOrder {
                module: module.id.clone(),
                phase: module.phase,
                previous_phase,
            });
        }
        previous_phase = module.phase;

        for dep in &module.dependencies {
            if index.get(dep).is_some_and(|&i| i > position) {
                return Err(ValidationError::DeclarationOrder {
                    module: module.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Raw manifest document before module-level decoding
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    defaults: ManifestDefaults,
    #[serde(default)]
    modules: Vec<serde_yaml_ng::Value>,
}

fn default_version() -> u32 {
    1
}

/// Structural reader for `acfs.manifest.yaml`
///
/// Decodes each module independently so every malformed field is reported in
/// one pass, then hands the typed modules to [`Manifest::new`].
pub struct ManifestFile;

impl ManifestFile {
    /// Read and validate a manifest file
    pub fn from_path(path: impl AsRef<Utf8Path>) -> Result<Manifest> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::config_not_found(path.as_str()));
        }
        let content = fs::read_to_string(path)?;
        debug!("Loaded manifest from {}", path);
        Self::from_yaml(&content)
    }

    /// Parse and validate manifest YAML
    pub fn from_yaml(content: &str) -> Result<Manifest> {
        let raw: RawManifest = serde_yaml_ng::from_str(content)?;

        let mut errors = Vec::new();
        if raw.version == 0 {
            errors.push(FieldError::new("version", "must be at least 1"));
        }
        if raw.defaults.target_user.trim().is_empty() {
            errors.push(FieldError::new("defaults.target_user", "must not be empty"));
        }

        let mut modules = Vec::with_capacity(raw.modules.len());
        for (i, value) in raw.modules.into_iter().enumerate() {
            match serde_yaml_ng::from_value::<Module>(value) {
                Ok(module) => {
                    check_module_fields(i, &module, &mut errors);
                    modules.push(module);
                }
                Err(e) => errors.push(FieldError::new(format!("modules[{}]", i), e.to_string())),
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError::Fields(errors).into());
        }

        let manifest = Manifest::new(raw.version, raw.name, raw.defaults, modules)?;
        debug!(
            "Manifest '{}' validated: {} modules across {} phases",
            manifest.name(),
            manifest.len(),
            manifest.phases().len()
        );
        Ok(manifest)
    }
}

fn check_module_fields(i: usize, module: &Module, errors: &mut Vec<FieldError>) {
    let actions = module
        .install
        .iter()
        .enumerate()
        .map(|(j, a)| (format!("modules[{}].install[{}]", i, j), a))
        .chain(
            module
                .verify
                .iter()
                .enumerate()
                .map(|(j, a)| (format!("modules[{}].verify[{}]", i, j), a)),
        );

    for (path, action) in actions {
        match action {
            Action::Shell(body) if body.trim().is_empty() => {
                errors.push(FieldError::new(path, "shell body must not be empty"));
            }
            Action::VerifiedInstaller(installer) if installer.tool.trim().is_empty() => {
                errors.push(FieldError::new(
                    format!("{}.verified_installer.tool", path),
                    "must not be empty",
                ));
            }
            _ => {}
        }
    }

    if let Some(probe) = &module.installed_check {
        if probe.command.trim().is_empty() {
            errors.push(FieldError::new(
                format!("modules[{}].installed_check", i),
                "command must not be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunAs;

    fn module(id: &str, phase: u8, deps: &[&str]) -> Module {
        Module {
            id: id.to_string(),
            description: String::new(),
            phase,
            tags: BTreeSet::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            run_as: RunAs::TargetUser,
            install: vec![Action::Shell("true".to_string())],
            verify: vec![],
            installed_check: None,
            optional: false,
            enabled_by_default: true,
        }
    }

    fn build(modules: Vec<Module>) -> std::result::Result<Manifest, ValidationError> {
        Manifest::new(1, "test", ManifestDefaults::default(), modules)
    }

    #[test]
    fn test_valid_manifest_queries() {
        let mut bun = module("lang.bun", 2, &["base.system"]);
        bun.tags.insert("runtime".to_string());
        let manifest = build(vec![
            module("base.system", 1, &[]),
            bun,
            module("agents.claude", 5, &["lang.bun"]),
            module("agents.codex", 5, &["lang.bun"]),
        ])
        .unwrap();

        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.index_of("agents.claude"), Some(2));
        assert!(manifest.contains("lang.bun"));
        assert!(!manifest.contains("lang.rust"));
        assert_eq!(manifest.phases(), vec![1, 2, 5]);
        assert_eq!(manifest.categories(), vec!["agents", "base", "lang"]);
        assert_eq!(manifest.tags(), vec!["runtime"]);
        assert_eq!(manifest.with_tag("runtime").len(), 1);
        assert_eq!(manifest.in_phase(5).len(), 2);
        assert_eq!(manifest.in_category("agents").len(), 2);

        let dependents: Vec<_> = manifest
            .dependents_of("lang.bun")
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(dependents, vec!["agents.claude", "agents.codex"]);
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["Lang.bun", "bun", "lang..bun", "lang.bun.", "-lang.bun"] {
            let err = build(vec![module(id, 1, &[])]).unwrap_err();
            assert_eq!(
                err,
                ValidationError::InvalidId {
                    module: id.to_string()
                },
                "{}",
                id
            );
        }
    }

    #[test]
    fn test_valid_ids() {
        for id in ["lang.bun", "tools.ast-grep", "cloud.gcloud_sdk.cli"] {
            assert!(is_valid_module_id(id), "{}", id);
        }
    }

    #[test]
    fn test_phase_out_of_range() {
        for phase in [0, 11] {
            let err = build(vec![module("base.system", phase, &[])]).unwrap_err();
            assert!(
                matches!(err, ValidationError::PhaseOutOfRange { .. }),
                "phase {}",
                phase
            );
        }
    }

    #[test]
    fn test_duplicate_id() {
        let err = build(vec![module("base.system", 1, &[]), module("base.system", 1, &[])])
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateId {
                module: "base.system".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_and_self_dependency() {
        let err = build(vec![module("lang.bun", 2, &["base.missing"])]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownDependency {
                module: "lang.bun".to_string(),
                dependency: "base.missing".to_string(),
            }
        );

        let err = build(vec![module("lang.bun", 2, &["lang.bun"])]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::SelfDependency {
                module: "lang.bun".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_reports_full_chain() {
        let err = build(vec![
            module("a.x", 1, &["a.y"]),
            module("a.y", 1, &["a.z"]),
            module("a.z", 1, &["a.x"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DependencyCycle {
                chain: vec![
                    "a.x".to_string(),
                    "a.y".to_string(),
                    "a.z".to_string(),
                    "a.x".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_cycle_wins_over_declaration_order() {
        // Both the cycle and the forward reference are violations; the cycle
        // is checked first.
        let err = build(vec![module("a.x", 1, &["a.y"]), module("a.y", 1, &["a.x"])])
            .unwrap_err();
        assert!(matches!(err, ValidationError::DependencyCycle { .. }));
    }

    #[test]
    fn test_phase_inversion() {
        let err = build(vec![
            module("lang.bun", 2, &[]),
            module("base.system", 3, &[]),
            module("agents.claude", 2, &["base.system"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::PhaseInversion {
                module: "agents.claude".to_string(),
                phase: 2,
                dependency: "base.system".to_string(),
                dependency_phase: 3,
            }
        );
    }

    #[test]
    fn test_phase_order_and_declaration_order() {
        let err = build(vec![module("lang.bun", 2, &[]), module("base.system", 1, &[])])
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::PhaseOrder {
                module: "base.system".to_string(),
                phase: 1,
                previous_phase: 2,
            }
        );

        let err = build(vec![
            module("agents.claude", 2, &["lang.bun"]),
            module("lang.bun", 2, &[]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DeclarationOrder {
                module: "agents.claude".to_string(),
                dependency: "lang.bun".to_string(),
            }
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
version: 2
name: acfs
defaults:
  target_user: ubuntu
  mode: safe
modules:
  - id: base.system
    phase: 1
    run_as: root
    install:
      - apt-get update
  - id: lang.bun
    phase: 2
    dependencies: [base.system]
    install:
      - verified_installer:
          tool: bun
    installed_check: "command -v bun"
"#;
        let manifest = ManifestFile::from_yaml(yaml).unwrap();
        assert_eq!(manifest.version(), 2);
        assert_eq!(manifest.name(), "acfs");
        assert_eq!(manifest.defaults().mode, crate::types::InstallMode::Safe);
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_from_yaml_collects_field_errors() {
        let yaml = r#"
modules:
  - id: base.system
    phase: 1
    run_as: admin
  - id: lang.bun
    phase: 2
    install:
      - ""
  - id: lang.uv
"#;
        let err = ManifestFile::from_yaml(yaml).unwrap_err();
        match err {
            Error::Validation(ValidationError::Fields(fields)) => {
                let paths: Vec<_> = fields.iter().map(|f| f.path.as_str()).collect();
                assert_eq!(paths, vec!["modules[0]", "modules[1].install[0]", "modules[2]"]);
            }
            other => panic!("expected field errors, got {:?}", other),
        }
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = ManifestFile::from_path("/nonexistent/acfs.manifest.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }
}
