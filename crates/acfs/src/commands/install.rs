//! Install command
//!
//! Resolves the selection, builds the execution context for the caller's
//! privileges and hands the plan to the phase engine. An existing state file
//! is resumed unless `--fresh` is given.

use acfs_core::types::{InstallMode, ManifestDefaults, Module};
use acfs_core::Manifest;
use acfs_installer::events::{FanoutObserver, ProgressObserver, TracingObserver};
use acfs_installer::selection::{resolve, ExecutionPlan};
use acfs_installer::{
    EngineFailure, EngineOptions, EngineState, HttpFetcher, Interaction, PhaseEngine, RunReport,
    ShellContext, VerifiedScriptExecutor,
};
use anyhow::{Context, Result};
use console::{style, Term};
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

use super::plan::print_plan;
use super::Workspace;
use crate::cli::{Cli, InstallArgs};
use crate::output;
use crate::progress::{CliObserver, TerminalPrompt};

#[derive(Tabled)]
struct SkippedToolRow {
    tool: String,
    module: String,
    reason: String,
}

pub async fn run(args: &InstallArgs, cli: &Cli) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let manifest = workspace.manifest()?;
    let registry = workspace.checksums(&manifest)?;
    let plan = resolve(&manifest, &args.selection.to_input())
        .context("Failed to resolve module selection")?;

    print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }

    if !args.yes && !args.dry_run {
        let confirmed = Confirm::new()
            .with_prompt(format!("Install {} modules?", plan.len()))
            .default(false)
            .interact()?;
        if !confirmed {
            output::info("Installation cancelled");
            return Ok(());
        }
    }

    let defaults = effective_defaults(&manifest, args, &workspace);
    let runner = Arc::new(
        ShellContext::detect(
            defaults.target_user.clone(),
            defaults.target_home(),
            defaults.mode,
        )
        .await
        .context("Failed to detect caller privileges")?
        .with_timeout(workspace.config.execution.action_timeout()),
    );

    let fetcher = HttpFetcher::new(&workspace.config.network)?;
    if !args.dry_run && uses_verified_installers(&manifest, &plan) {
        probe_connectivity(&fetcher, &workspace).await;
    }

    let bar = output::progress_bar(plan.len() as u64);
    let interaction = if args.yes || !Term::stdout().is_term() {
        Interaction::Automated
    } else {
        Interaction::Interactive(Arc::new(TerminalPrompt::new(bar.clone())))
    };
    let verified = VerifiedScriptExecutor::new(
        Arc::new(registry),
        Arc::new(fetcher),
        runner.clone(),
        interaction,
    );

    let mut observer = FanoutObserver::new().with(Arc::new(CliObserver::new(bar, &plan)));
    if cli.verbose > 0 {
        observer = observer.with(Arc::new(TracingObserver));
    }
    let observer: Arc<dyn ProgressObserver> = Arc::new(observer);

    let engine = PhaseEngine::new(
        Arc::new(manifest),
        runner,
        Arc::new(verified),
        workspace.state_store(),
    )
    .with_observer(observer)
    .with_options(EngineOptions {
        dry_run: args.dry_run,
        fresh: args.fresh,
        mode: defaults.mode,
    });

    match engine.run(&plan).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(failure) => {
            print_failure(&failure, &workspace);
            Err(failure.into())
        }
    }
}

/// Target user and mode after CLI flags and config overrides
fn effective_defaults(manifest: &Manifest, args: &InstallArgs, workspace: &Workspace) -> ManifestDefaults {
    let base = manifest.defaults();
    let target_user = args
        .target_user
        .clone()
        .or_else(|| workspace.config.execution.target_user.clone())
        .unwrap_or_else(|| base.target_user.clone());
    let mode: InstallMode = args
        .mode
        .or(workspace.config.execution.mode)
        .unwrap_or(base.mode);

    // A custom home only applies to the user it was declared for
    let target_home = (target_user == base.target_user)
        .then(|| base.target_home.clone())
        .flatten();

    ManifestDefaults {
        target_user,
        target_home,
        mode,
    }
}

fn uses_verified_installers(manifest: &Manifest, plan: &ExecutionPlan) -> bool {
    plan.entries
        .iter()
        .filter_map(|e| manifest.get(&e.id))
        .any(|m: &Module| m.installer_refs().next().is_some())
}

/// Warn early when installer hosts are unreachable; fetches still decide
async fn probe_connectivity(fetcher: &HttpFetcher, workspace: &Workspace) {
    let network = &workspace.config.network;
    let spinner = output::spinner("Checking network connectivity...");
    let reachable = fetcher
        .probe(&network.probe_url, Duration::from_secs(network.probe_timeout_secs))
        .await;
    spinner.finish_and_clear();

    if !reachable {
        output::warning(&format!(
            "{} is unreachable; installer downloads will likely fail",
            network.probe_url
        ));
    }
}

fn print_report(report: &RunReport) {
    println!();
    if report.dry_run {
        output::success(&format!(
            "Dry run complete: {} to install, {} already installed",
            report.installed.len(),
            report.satisfied.len()
        ));
        return;
    }

    let mut extras = Vec::new();
    if !report.skipped.is_empty() {
        extras.push(format!("{} skipped", report.skipped.len()));
    }
    if !report.skipped_phases.is_empty() {
        extras.push(format!("{} phases resumed", report.skipped_phases.len()));
    }
    output::success(&format!(
        "Installation complete in {} ({} installed, {} already present{})",
        output::duration(report.duration_secs),
        report.installed.len(),
        report.satisfied.len(),
        extras.iter().map(|e| format!(", {}", e)).collect::<String>()
    ));

    if !report.warnings().is_empty() {
        output::header("Optional modules that failed");
        for warning in report.warnings() {
            println!(
                "  {} {} ({}): {}",
                style("⚠").yellow(),
                style(&warning.module).bold(),
                warning.step,
                warning.error
            );
        }
    }

    if !report.skipped_tools().is_empty() {
        output::header("Skipped installers");
        let rows: Vec<SkippedToolRow> = report
            .skipped_tools()
            .iter()
            .map(|s| SkippedToolRow {
                tool: s.tool.clone(),
                module: s.module.clone(),
                reason: s.reason.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{}", table);
    }
}

fn print_failure(failure: &EngineFailure, workspace: &Workspace) {
    println!();
    if let EngineState::Failed { phase, step, .. } = &failure.outcome {
        output::error(&format!("Installation halted in phase {} at {}", phase, step));
    }
    if failure.state.is_some() {
        output::info(&format!(
            "Progress saved to {}; run `acfs install` again to resume",
            workspace.state_path
        ));
    }
}
