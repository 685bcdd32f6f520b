//! Terminal rendering of engine progress and the checksum mismatch prompt

use acfs_installer::events::{InstallEvent, ProgressObserver};
use acfs_installer::verified::{MismatchChoice, MismatchPrompt};
use acfs_installer::ExecutionPlan;
use console::style;
use dialoguer::Select;
use indicatif::ProgressBar;
use std::collections::BTreeMap;

use crate::output;

/// Drives a module progress bar from engine events
pub struct CliObserver {
    bar: ProgressBar,
    phase_sizes: BTreeMap<u8, u64>,
}

impl CliObserver {
    pub fn new(bar: ProgressBar, plan: &ExecutionPlan) -> Self {
        let phase_sizes = plan
            .by_phase()
            .into_iter()
            .map(|(phase, entries)| (phase, entries.len() as u64))
            .collect();
        Self { bar, phase_sizes }
    }
}

impl ProgressObserver for CliObserver {
    fn on_event(&self, event: &InstallEvent) {
        match event {
            InstallEvent::RunStarted {
                resumed, dry_run, ..
            } => {
                if *resumed {
                    self.bar.println(format!(
                        "{} Resuming previous installation",
                        style("↻").cyan().bold()
                    ));
                }
                if *dry_run {
                    self.bar.println(format!(
                        "{} Dry run: nothing will be changed",
                        style("ℹ").blue().bold()
                    ));
                }
            }
            InstallEvent::PlanChanged { .. } => self.bar.println(format!(
                "{} Selection differs from the one this installation started with",
                style("⚠").yellow().bold()
            )),
            InstallEvent::PhaseStarted { phase, modules } => {
                self.bar.println(format!(
                    "\n{}",
                    style(format!("Phase {} ({} modules)", phase, modules)).bold()
                ));
            }
            InstallEvent::PhaseSkipped { phase } => {
                self.bar.inc(self.phase_sizes.get(phase).copied().unwrap_or(0));
                self.bar.println(format!(
                    "{} Phase {} already completed",
                    style("✓").dim(),
                    phase
                ));
            }
            InstallEvent::ModuleStarted { module, .. } => {
                self.bar.set_message(module.clone());
            }
            InstallEvent::ModuleSatisfied { module } => {
                self.bar.inc(1);
                self.bar.println(format!(
                    "  {} {} {}",
                    style("✓").green(),
                    module,
                    style("(already installed)").dim()
                ));
            }
            InstallEvent::ModuleInstalled {
                module,
                duration_secs,
            } => {
                self.bar.inc(1);
                self.bar.println(format!(
                    "  {} {} {}",
                    style("✓").green().bold(),
                    module,
                    style(output::duration(*duration_secs)).dim()
                ));
            }
            InstallEvent::DryRunAction { module, step } => {
                self.bar.println(format!(
                    "  {} {}: would run {}",
                    style("·").dim(),
                    module,
                    step
                ));
            }
            InstallEvent::ToolSkipped { tool, reason, .. } => {
                self.bar.println(format!(
                    "  {} installer '{}' skipped ({})",
                    style("⚠").yellow().bold(),
                    tool,
                    reason
                ));
            }
            InstallEvent::ModuleSkipped { module, .. } => {
                self.bar.inc(1);
                self.bar.println(format!(
                    "  {} {} {}",
                    style("⚠").yellow().bold(),
                    module,
                    style("(not installed)").dim()
                ));
            }
            InstallEvent::ModuleWarning { module, step, .. } => {
                self.bar.inc(1);
                self.bar.println(format!(
                    "  {} {} failed at {} (optional, continuing)",
                    style("⚠").yellow().bold(),
                    module,
                    step
                ));
            }
            InstallEvent::ModuleFailed { module, step, .. } => {
                self.bar.abandon_with_message(format!("{} failed at {}", module, step));
            }
            InstallEvent::RunCompleted { .. } => self.bar.finish_and_clear(),
            InstallEvent::StepStarted { module, step } => {
                self.bar.set_message(format!("{} {}", module, step));
            }
            InstallEvent::StepCompleted { .. } | InstallEvent::PhaseCompleted { .. } => {}
        }
    }
}

/// Asks the operator through a terminal menu
pub struct TerminalPrompt {
    bar: ProgressBar,
}

impl TerminalPrompt {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl MismatchPrompt for TerminalPrompt {
    fn on_mismatch(&self, tool: &str, url: &str, expected: &str, actual: &str) -> MismatchChoice {
        self.bar.suspend(|| {
            output::warning(&format!("Checksum mismatch for installer '{}'", tool));
            output::kv("URL", url);
            output::kv("Expected", expected);
            output::kv("Actual", actual);

            let choices = [
                "Skip this tool",
                "Abort the installation",
                "Execute anyway (unverified)",
            ];
            let selection = Select::new()
                .with_prompt("How do you want to proceed?")
                .items(&choices)
                .default(0)
                .interact();

            match selection {
                Ok(1) => MismatchChoice::Abort,
                Ok(2) => MismatchChoice::ExecuteAnyway,
                // No answer behaves like an unattended run
                _ => MismatchChoice::Skip,
            }
        })
    }
}
