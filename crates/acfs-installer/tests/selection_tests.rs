//! Integration tests for module selection

mod common;

use acfs_core::error::{Error, SelectionError};
use acfs_core::types::{ManifestDefaults, Module, RunAs};
use acfs_core::Manifest;
use acfs_installer::selection::{resolve, ExclusionReason, InclusionReason, SelectionInput};
use common::*;
use proptest::prelude::*;

#[test]
fn test_only_pulls_in_dependencies() {
    let manifest = scenario_manifest();
    let plan = resolve(&manifest, &SelectionInput::only(["agents.claude"])).unwrap();

    assert_eq!(plan.ids(), vec!["lang.bun", "agents.claude"]);
    assert_eq!(
        plan.entry("lang.bun").unwrap().reason,
        InclusionReason::DependencyOf("agents.claude".to_string())
    );
    assert_eq!(
        plan.entry("agents.claude").unwrap().reason,
        InclusionReason::Explicit
    );
    assert_eq!(
        plan.exclusion("base.system"),
        Some(&ExclusionReason::NotSelected)
    );
}

#[test]
fn test_skipping_required_dependency_is_rejected() {
    let manifest = scenario_manifest();
    let input = SelectionInput::only(["agents.claude"]).skip(["lang.bun"]);

    let err = resolve(&manifest, &input).unwrap_err();
    match &err {
        Error::Selection(SelectionError::SkippedDependency {
            dependent,
            dependency,
            chain,
        }) => {
            assert_eq!(dependent, "agents.claude");
            assert_eq!(dependency, "lang.bun");
            assert_eq!(chain, &vec!["agents.claude".to_string(), "lang.bun".to_string()]);
        }
        other => panic!("expected skipped dependency, got {:?}", other),
    }
    assert!(err.to_string().contains("agents.claude -> lang.bun"));
}

#[test]
fn test_transitive_skip_conflict_reports_full_chain() {
    let manifest = stack_manifest();
    let input = SelectionInput::only(["agents.claude"]).skip(["base.system"]);

    let err = resolve(&manifest, &input).unwrap_err();
    assert!(
        err.to_string()
            .contains("agents.claude -> lang.bun -> base.system"),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_default_selection_runs_everything_in_manifest_order() {
    let manifest = stack_manifest();
    let plan = resolve(&manifest, &SelectionInput::default()).unwrap();

    assert_eq!(
        plan.ids(),
        vec![
            "base.system",
            "shell.zsh",
            "lang.bun",
            "agents.claude",
            "tools.ntm"
        ]
    );
    assert_eq!(plan.phases(), vec![1, 2, 3, 4]);
    assert!(plan.warnings.is_empty());
}

#[test]
fn test_skip_leaf_module_from_defaults() {
    let manifest = stack_manifest();
    let plan = resolve(&manifest, &SelectionInput::default().skip(["tools.ntm"])).unwrap();

    assert!(!plan.contains("tools.ntm"));
    assert_eq!(
        plan.exclusion("tools.ntm"),
        Some(&ExclusionReason::ExplicitlySkipped)
    );
}

#[test]
fn test_skip_tag_and_unmatched_tag_warning() {
    let manifest = stack_manifest();
    let input = SelectionInput {
        skip_tags: vec!["agents".to_string(), "gpu".to_string()],
        ..Default::default()
    };
    let plan = resolve(&manifest, &input).unwrap();

    assert!(!plan.contains("agents.claude"));
    assert_eq!(
        plan.exclusion("agents.claude"),
        Some(&ExclusionReason::SkippedTag("agents".to_string()))
    );
    assert_eq!(
        plan.warnings,
        vec!["Skip tag 'gpu' matches no modules".to_string()]
    );
}

#[test]
fn test_only_phase_selects_phase_and_dependencies() {
    let manifest = stack_manifest();
    let input = SelectionInput {
        only_phases: vec![3],
        ..Default::default()
    };
    let plan = resolve(&manifest, &input).unwrap();
    assert_eq!(plan.ids(), vec!["base.system", "lang.bun", "agents.claude"]);
}

#[test]
fn test_unknown_phase_is_rejected() {
    let manifest = stack_manifest();
    let input = SelectionInput {
        only_phases: vec![9],
        ..Default::default()
    };
    let err = resolve(&manifest, &input).unwrap_err();
    assert!(matches!(
        err,
        Error::Selection(SelectionError::UnknownPhase { phase: 9 })
    ));
}

#[test]
fn test_no_deps_keeps_start_set_only() {
    let manifest = stack_manifest();
    let input = SelectionInput {
        only_modules: vec!["agents.claude".to_string()],
        no_deps: true,
        ..Default::default()
    };
    let plan = resolve(&manifest, &input).unwrap();

    assert_eq!(plan.ids(), vec!["agents.claude"]);
    assert_eq!(plan.warnings.len(), 1);
}

#[test]
fn test_disabled_module_only_runs_when_named() {
    let manifest = ManifestBuilder::new()
        .module(ModuleBuilder::new("base.system", 1))
        .module(ModuleBuilder::new("tools.extra", 2).disabled_by_default())
        .build();

    let plan = resolve(&manifest, &SelectionInput::default()).unwrap();
    assert_eq!(plan.ids(), vec!["base.system"]);
    assert_eq!(
        plan.exclusion("tools.extra"),
        Some(&ExclusionReason::DisabledByDefault)
    );

    let plan = resolve(&manifest, &SelectionInput::only(["tools.extra"])).unwrap();
    assert_eq!(plan.ids(), vec!["tools.extra"]);
}

#[test]
fn test_fingerprint_tracks_selection() {
    let manifest = stack_manifest();
    let all = resolve(&manifest, &SelectionInput::default()).unwrap();
    let again = resolve(&manifest, &SelectionInput::default()).unwrap();
    let fewer = resolve(&manifest, &SelectionInput::default().skip(["tools.ntm"])).unwrap();

    assert_eq!(all.fingerprint(), again.fingerprint());
    assert_ne!(all.fingerprint(), fewer.fingerprint());
}

// ---------------------------------------------------------------------------
// Properties over generated manifests
// ---------------------------------------------------------------------------

/// Generated manifest: module i lives in a non-decreasing phase and may only
/// depend on modules declared before it.
fn arb_manifest() -> impl Strategy<Value = Manifest> {
    (2usize..12)
        .prop_flat_map(|n| {
            (
                proptest::collection::vec(0u8..2, n),
                proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n),
            )
        })
        .prop_map(|(phase_steps, edges)| {
            let mut phase = 1u8;
            let mut modules: Vec<Module> = Vec::new();
            for (i, step) in phase_steps.iter().enumerate() {
                phase = (phase + step).min(10);
                let dependencies = (0..i)
                    .filter(|&j| edges[i][j])
                    .map(|j| modules[j].id.clone())
                    .collect();
                modules.push(Module {
                    dependencies,
                    run_as: RunAs::TargetUser,
                    ..ModuleBuilder::new(&format!("cat{}.m{}", i % 3, i), phase).build()
                });
            }
            Manifest::new(1, "generated", ManifestDefaults::default(), modules)
                .expect("generated manifest is valid by construction")
        })
}

proptest! {
    #[test]
    fn prop_resolve_is_deterministic(manifest in arb_manifest(), pick in any::<prop::sample::Index>()) {
        let target = manifest.modules()[pick.index(manifest.len())].id.clone();
        let input = SelectionInput::only([target]);

        let first = resolve(&manifest, &input).unwrap();
        let second = resolve(&manifest, &input).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_dependencies_precede_dependents(manifest in arb_manifest(), pick in any::<prop::sample::Index>()) {
        let target = manifest.modules()[pick.index(manifest.len())].id.clone();
        let plan = resolve(&manifest, &SelectionInput::only([target])).unwrap();
        let ids = plan.ids();

        for (position, id) in ids.iter().enumerate() {
            let module = manifest.get(id).unwrap();
            for dependency in &module.dependencies {
                let dep_position = ids.iter().position(|i| i == dependency);
                prop_assert!(dep_position.is_some(), "{} missing dependency {}", id, dependency);
                prop_assert!(dep_position.unwrap() < position);
            }
        }

        let phases: Vec<u8> = plan.entries.iter().map(|e| e.phase).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        prop_assert_eq!(phases, sorted);
    }

    #[test]
    fn prop_skip_never_leaves_missing_dependency(
        manifest in arb_manifest(),
        pick in any::<prop::sample::Index>(),
        skip in any::<prop::sample::Index>(),
    ) {
        let target = manifest.modules()[pick.index(manifest.len())].id.clone();
        let skipped = manifest.modules()[skip.index(manifest.len())].id.clone();
        let input = SelectionInput::only([target]).skip([skipped.clone()]);

        match resolve(&manifest, &input) {
            Ok(plan) => {
                prop_assert!(!plan.contains(&skipped));
                for entry in &plan.entries {
                    let module = manifest.get(&entry.id).unwrap();
                    for dependency in &module.dependencies {
                        prop_assert!(plan.contains(dependency));
                    }
                }
            }
            Err(Error::Selection(SelectionError::SkippedDependency { dependency, .. })) => {
                prop_assert_eq!(dependency, skipped);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
