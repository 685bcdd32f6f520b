//! Module selection: manifest + user flags → ordered execution plan
//!
//! [`resolve`] is a pure function. It never touches the filesystem or the
//! network, and identical inputs always produce an identical plan.

use acfs_core::error::{Result, SelectionError, ValidationError};
use acfs_core::types::Module;
use acfs_core::Manifest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// User selection flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionInput {
    /// Start from exactly these modules
    #[serde(default)]
    pub only_modules: Vec<String>,

    /// Start from every module in these phases
    #[serde(default)]
    pub only_phases: Vec<u8>,

    #[serde(default)]
    pub skip_modules: Vec<String>,

    #[serde(default)]
    pub skip_tags: Vec<String>,

    #[serde(default)]
    pub skip_categories: Vec<String>,

    /// Do not pull in dependencies of the start set
    #[serde(default)]
    pub no_deps: bool,
}

impl SelectionInput {
    pub fn only(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            only_modules: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn skip(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skip_modules.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Whether an only-filter replaces the default start set
    pub fn has_only_filter(&self) -> bool {
        !self.only_modules.is_empty() || !self.only_phases.is_empty()
    }
}

/// Why a module is in the plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum InclusionReason {
    /// Named by an only-filter
    Explicit,
    /// Enabled by default and no only-filter was given
    Default,
    /// Pulled in by the named dependent
    DependencyOf(String),
}

impl fmt::Display for InclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Default => write!(f, "default"),
            Self::DependencyOf(id) => write!(f, "dependency-of:{}", id),
        }
    }
}

impl From<InclusionReason> for String {
    fn from(reason: InclusionReason) -> Self {
        reason.to_string()
    }
}

impl TryFrom<String> for InclusionReason {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "explicit" => Ok(Self::Explicit),
            "default" => Ok(Self::Default),
            other => other
                .strip_prefix("dependency-of:")
                .map(|id| Self::DependencyOf(id.to_string()))
                .ok_or_else(|| format!("unknown inclusion reason '{}'", other)),
        }
    }
}

/// Why a manifest module is not in the plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ExclusionReason {
    ExplicitlySkipped,
    SkippedTag(String),
    SkippedCategory(String),
    DisabledByDefault,
    NotSelected,
}

impl ExclusionReason {
    fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::ExplicitlySkipped | Self::SkippedTag(_) | Self::SkippedCategory(_)
        )
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitlySkipped => write!(f, "explicitly-skipped"),
            Self::SkippedTag(tag) => write!(f, "skipped-tag:{}", tag),
            Self::SkippedCategory(category) => write!(f, "skipped-category:{}", category),
            Self::DisabledByDefault => write!(f, "disabled-by-default"),
            Self::NotSelected => write!(f, "not-selected"),
        }
    }
}

impl From<ExclusionReason> for String {
    fn from(reason: ExclusionReason) -> Self {
        reason.to_string()
    }
}

impl TryFrom<String> for ExclusionReason {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "explicitly-skipped" => Ok(Self::ExplicitlySkipped),
            "disabled-by-default" => Ok(Self::DisabledByDefault),
            "not-selected" => Ok(Self::NotSelected),
            other => {
                if let Some(tag) = other.strip_prefix("skipped-tag:") {
                    Ok(Self::SkippedTag(tag.to_string()))
                } else if let Some(category) = other.strip_prefix("skipped-category:") {
                    Ok(Self::SkippedCategory(category.to_string()))
                } else {
                    Err(format!("unknown exclusion reason '{}'", other))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub id: String,
    pub phase: u8,
    pub reason: InclusionReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedModule {
    pub id: String,
    pub reason: ExclusionReason,
}

/// Ordered, dependency-closed list of modules to execute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub entries: Vec<PlanEntry>,
    pub excluded: Vec<ExcludedModule>,
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Planned ids in execution order
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    /// Distinct phases, ascending
    pub fn phases(&self) -> Vec<u8> {
        let phases: BTreeSet<u8> = self.entries.iter().map(|e| e.phase).collect();
        phases.into_iter().collect()
    }

    /// Entries grouped by phase, ascending, each group in plan order
    pub fn by_phase(&self) -> BTreeMap<u8, Vec<&PlanEntry>> {
        let mut groups: BTreeMap<u8, Vec<&PlanEntry>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.phase).or_default().push(entry);
        }
        groups
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn entry(&self, id: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn exclusion(&self, id: &str) -> Option<&ExclusionReason> {
        self.excluded.iter().find(|e| e.id == id).map(|e| &e.reason)
    }

    /// SHA-256 over the ordered ids; changes whenever the selection does
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.id.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Compute the execution plan for a selection
pub fn resolve(manifest: &Manifest, input: &SelectionInput) -> Result<ExecutionPlan> {
    let modules = manifest.modules();
    let mut warnings = Vec::new();

    let (start, start_reason) = start_set(manifest, input, &mut warnings)?;
    let skipped = skip_set(manifest, input, &mut warnings)?;

    check_skip_conflicts(manifest, &start, &skipped)?;

    let mut included: BTreeMap<usize, InclusionReason> = start
        .iter()
        .map(|&i| (i, start_reason.clone()))
        .collect();

    if input.no_deps {
        warnings.push(
            "Dependency resolution disabled: prerequisites of the selected modules must already be installed"
                .to_string(),
        );
    } else {
        close_over_dependencies(manifest, &start, &skipped, &mut included)?;
    }

    // Skip always wins, even over the start set.
    included.retain(|i, _| !skipped.contains_key(i));

    let entries: Vec<PlanEntry> = included
        .into_iter()
        .map(|(i, reason)| PlanEntry {
            id: modules[i].id.clone(),
            phase: modules[i].phase,
            reason,
        })
        .collect();

    let planned: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    let excluded = modules
        .iter()
        .enumerate()
        .filter(|(_, m)| !planned.contains(m.id.as_str()))
        .map(|(i, m)| ExcludedModule {
            id: m.id.clone(),
            reason: exclusion_reason(m, skipped.get(&i), input),
        })
        .collect();

    let plan = ExecutionPlan {
        entries,
        excluded,
        warnings,
    };
    debug!(
        "Resolved plan: {} modules across {} phases ({} excluded, {} warnings)",
        plan.len(),
        plan.phases().len(),
        plan.excluded.len(),
        plan.warnings.len()
    );
    Ok(plan)
}

fn start_set(
    manifest: &Manifest,
    input: &SelectionInput,
    warnings: &mut Vec<String>,
) -> Result<(BTreeSet<usize>, InclusionReason)> {
    let mut start = BTreeSet::new();

    if !input.only_modules.is_empty() {
        if !input.only_phases.is_empty() {
            warnings.push(
                "Both module and phase filters given; the phase filter is ignored".to_string(),
            );
        }
        for id in &input.only_modules {
            let index = manifest
                .index_of(id)
                .ok_or_else(|| SelectionError::unknown_module(id))?;
            start.insert(index);
        }
        return Ok((start, InclusionReason::Explicit));
    }

    if !input.only_phases.is_empty() {
        for &phase in &input.only_phases {
            if manifest.in_phase(phase).is_empty() {
                return Err(SelectionError::UnknownPhase { phase }.into());
            }
            for (i, module) in manifest.modules().iter().enumerate() {
                if module.phase == phase {
                    start.insert(i);
                }
            }
        }
        return Ok((start, InclusionReason::Explicit));
    }

    for (i, module) in manifest.modules().iter().enumerate() {
        if module.enabled_by_default {
            start.insert(i);
        }
    }
    Ok((start, InclusionReason::Default))
}

/// Skipped module index → first matching skip rule
fn skip_set(
    manifest: &Manifest,
    input: &SelectionInput,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<usize, ExclusionReason>> {
    let mut skipped = BTreeMap::new();

    for id in &input.skip_modules {
        let index = manifest
            .index_of(id)
            .ok_or_else(|| SelectionError::unknown_module(id))?;
        skipped.entry(index).or_insert(ExclusionReason::ExplicitlySkipped);
    }

    for tag in &input.skip_tags {
        let mut matched = false;
        for (i, module) in manifest.modules().iter().enumerate() {
            if module.has_tag(tag) {
                matched = true;
                skipped
                    .entry(i)
                    .or_insert_with(|| ExclusionReason::SkippedTag(tag.clone()));
            }
        }
        if !matched {
            warnings.push(format!("Skip tag '{}' matches no modules", tag));
        }
    }

    for category in &input.skip_categories {
        let mut matched = false;
        for (i, module) in manifest.modules().iter().enumerate() {
            if module.category() == category {
                matched = true;
                skipped
                    .entry(i)
                    .or_insert_with(|| ExclusionReason::SkippedCategory(category.clone()));
            }
        }
        if !matched {
            warnings.push(format!("Skip category '{}' matches no modules", category));
        }
    }

    Ok(skipped)
}

/// Refuse to skip anything a selected module transitively needs
///
/// Walks every non-skipped start module's dependencies depth-first with an
/// explicit stack. The first skipped dependency reached fails with the full
/// chain from the selected module down to it.
fn check_skip_conflicts(
    manifest: &Manifest,
    start: &BTreeSet<usize>,
    skipped: &BTreeMap<usize, ExclusionReason>,
) -> Result<()> {
    if skipped.is_empty() {
        return Ok(());
    }

    let modules = manifest.modules();
    let mut cleared: HashSet<usize> = HashSet::new();

    for &root in start {
        if skipped.contains_key(&root) || cleared.contains(&root) {
            continue;
        }

        // (module index, next dependency to look at)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let deps = &modules[node].dependencies;
            if next >= deps.len() {
                cleared.insert(node);
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let dep = dependency_index(manifest, &modules[node], &deps[next])?;
            if skipped.contains_key(&dep) {
                let mut chain: Vec<String> =
                    stack.iter().map(|&(n, _)| modules[n].id.clone()).collect();
                chain.push(modules[dep].id.clone());
                return Err(SelectionError::skipped_dependency(chain).into());
            }
            if !cleared.contains(&dep) {
                stack.push((dep, 0));
            }
        }
    }
    Ok(())
}

/// Breadth-first closure from the start set in declaration order
fn close_over_dependencies(
    manifest: &Manifest,
    start: &BTreeSet<usize>,
    skipped: &BTreeMap<usize, ExclusionReason>,
    included: &mut BTreeMap<usize, InclusionReason>,
) -> Result<()> {
    let modules = manifest.modules();
    let mut queue: VecDeque<usize> = start
        .iter()
        .copied()
        .filter(|i| !skipped.contains_key(i))
        .collect();

    while let Some(node) = queue.pop_front() {
        let module = &modules[node];
        for dep_id in &module.dependencies {
            let dep = dependency_index(manifest, module, dep_id)?;
            if skipped.contains_key(&dep) {
                return Err(
                    SelectionError::skipped_dependency(vec![module.id.clone(), dep_id.clone()])
                        .into(),
                );
            }
            if !included.contains_key(&dep) {
                included.insert(dep, InclusionReason::DependencyOf(module.id.clone()));
                queue.push_back(dep);
            }
        }
    }
    Ok(())
}

fn dependency_index(manifest: &Manifest, module: &Module, dep: &str) -> Result<usize> {
    manifest.index_of(dep).ok_or_else(|| {
        ValidationError::UnknownDependency {
            module: module.id.clone(),
            dependency: dep.to_string(),
        }
        .into()
    })
}

fn exclusion_reason(
    module: &Module,
    skip: Option<&ExclusionReason>,
    input: &SelectionInput,
) -> ExclusionReason {
    match skip {
        Some(reason) if reason.is_skip() => reason.clone(),
        _ if !input.has_only_filter() && !module.enabled_by_default => {
            ExclusionReason::DisabledByDefault
        }
        _ => ExclusionReason::NotSelected,
    }
}
