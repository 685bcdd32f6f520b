//! Status command

use acfs_installer::InstallationState;
use anyhow::{Context, Result};
use console::style;

use super::Workspace;
use crate::cli::{Cli, StatusArgs};
use crate::output;

pub async fn run(args: &StatusArgs, cli: &Cli) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let store = workspace.state_store();
    let state = store
        .load()
        .with_context(|| format!("Failed to read installation state {}", store.path()))?;

    let Some(state) = state else {
        if args.json {
            println!("null");
        } else {
            output::info(&format!("No installation state at {}", store.path()));
        }
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    print_state(&state);

    // Phases still to run, when the manifest is at hand
    if let Ok(manifest) = workspace.manifest() {
        let remaining: Vec<String> = manifest
            .phases()
            .into_iter()
            .filter(|p| !state.is_phase_completed(*p))
            .map(|p| p.to_string())
            .collect();
        if !remaining.is_empty() {
            output::kv("Remaining phases", &remaining.join(", "));
        }
    }
    Ok(())
}

fn print_state(state: &InstallationState) {
    output::header("Installation state");
    output::kv("Run", &state.metadata.run_id.to_string());
    output::kv("Mode", &state.metadata.mode.to_string());
    output::kv("Installer version", &state.metadata.tool_version);
    output::kv(
        "Started",
        &state.metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    output::kv(
        "Last updated",
        &state.last_updated.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );

    let completed: Vec<String> = state
        .completed_phases
        .iter()
        .map(|p| match state.phase_durations.get(p) {
            Some(secs) => format!("{} ({})", p, output::duration(*secs)),
            None => p.to_string(),
        })
        .collect();
    output::kv(
        "Completed phases",
        &if completed.is_empty() {
            "none".to_string()
        } else {
            completed.join(", ")
        },
    );

    if let Some(failure) = &state.failure {
        println!();
        output::error(&format!(
            "Failed in phase {} at {}: {}",
            failure.phase, failure.module, failure.step
        ));
        println!("    {}", failure.error);
    } else if let Some(phase) = state.current_phase {
        println!();
        output::warning(&format!(
            "Interrupted in phase {}{}",
            phase,
            state
                .current_step
                .as_ref()
                .map(|s| format!(" at {}", s))
                .unwrap_or_default()
        ));
    }

    if !state.warnings.is_empty() {
        output::header("Optional module failures");
        for warning in &state.warnings {
            println!(
                "  {} {} ({}): {}",
                style("⚠").yellow(),
                warning.module,
                warning.step,
                warning.error
            );
        }
    }

    if !state.skipped_tools.is_empty() {
        output::header("Skipped installers");
        for skipped in &state.skipped_tools {
            println!(
                "  {} {} ({}): {}",
                style("⚠").yellow(),
                skipped.tool,
                skipped.module,
                skipped.reason
            );
        }
    }
}
