//! Checkpointed phase execution
//!
//! ```text
//! NotStarted → PhaseRunning(n) → PhaseComplete(n) → … → AllComplete
//!                     └──────────→ Failed { phase, step, error }
//! ```
//!
//! State is flushed before the engine moves past any phase boundary, before
//! and after every step, and on failure. Completed phases are skipped outright
//! on resume, including their probes.

use crate::context::{CommandRunner, ShellInvocation};
use crate::events::{EngineState, InstallEvent, ProgressObserver, TracingObserver};
use crate::selection::ExecutionPlan;
use crate::state::{InstallationState, SkippedTool, StateStore, StepFailure};
use crate::verified::{ScriptOutcome, VerifiedScriptExecutor};
use acfs_core::error::{Error, SelectionError};
use acfs_core::types::{Action, InstallMode, Module};
use acfs_core::Manifest;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Run-wide switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    /// Probe only; never mutate the system or write state
    pub dry_run: bool,
    /// Ignore any persisted state and start over
    pub fresh: bool,
    /// Recorded in new state files
    pub mode: InstallMode,
}

/// Successful (or dry) run summary
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: InstallationState,
    pub outcome: EngineState,
    pub resumed: bool,
    pub dry_run: bool,
    /// Modules whose install actions ran (or would run, in a dry run)
    pub installed: Vec<String>,
    /// Modules whose installed_check passed
    pub satisfied: Vec<String>,
    /// Modules left uninstalled because the checksum policy skipped their installer
    pub skipped: Vec<String>,
    /// Phases completed by an earlier run
    pub skipped_phases: Vec<u8>,
    pub duration_secs: f64,
}

impl RunReport {
    pub fn skipped_tools(&self) -> &[SkippedTool] {
        &self.state.skipped_tools
    }

    pub fn warnings(&self) -> &[StepFailure] {
        &self.state.warnings
    }
}

/// A halted run: the error plus the last state snapshot
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EngineFailure {
    pub error: Error,
    /// `None` when the run failed before any state was loaded
    pub state: Option<InstallationState>,
    pub outcome: EngineState,
}

impl EngineFailure {
    fn before_start(error: Error) -> Self {
        Self {
            error,
            state: None,
            outcome: EngineState::NotStarted,
        }
    }
}

/// What happened to one module
enum ModuleOutcome {
    Satisfied,
    Installed,
    SkippedByPolicy,
}

/// Why a module stopped
enum ModuleError {
    /// A step failed; optional modules may absorb it
    Step { step: String, error: Error },
    /// Always halts (state persistence)
    Fatal(Error),
}

/// Drives an [`ExecutionPlan`] to completion, phase by phase
pub struct PhaseEngine {
    manifest: Arc<Manifest>,
    runner: Arc<dyn CommandRunner>,
    verified: Arc<VerifiedScriptExecutor>,
    store: StateStore,
    observer: Arc<dyn ProgressObserver>,
    options: EngineOptions,
}

impl PhaseEngine {
    pub fn new(
        manifest: Arc<Manifest>,
        runner: Arc<dyn CommandRunner>,
        verified: Arc<VerifiedScriptExecutor>,
        store: StateStore,
    ) -> Self {
        Self {
            manifest,
            runner,
            verified,
            store,
            observer: Arc::new(TracingObserver),
            options: EngineOptions::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn emit(&self, event: InstallEvent) {
        self.observer.on_event(&event);
    }

    /// Flush state unless this is a dry run
    fn checkpoint(&self, state: &mut InstallationState) -> Result<(), Error> {
        if self.options.dry_run {
            return Ok(());
        }
        state.touch();
        self.store.save(state)
    }

    /// Execute `plan`, resuming from persisted state when present
    pub async fn run(&self, plan: &ExecutionPlan) -> Result<RunReport, EngineFailure> {
        let run_started = Instant::now();

        // The lock is held until this function returns.
        let _lock = if self.options.dry_run {
            None
        } else {
            Some(self.store.lock().map_err(EngineFailure::before_start)?)
        };

        let fingerprint = plan.fingerprint();
        let previous = if self.options.fresh {
            None
        } else {
            self.store.load().map_err(EngineFailure::before_start)?
        };
        let resumed = previous.is_some();
        let mut state = match previous {
            Some(state) => state,
            None => InstallationState::new(self.options.mode, fingerprint.clone()),
        };

        if resumed {
            info!(
                "Resuming run {} ({} phase(s) already completed)",
                state.metadata.run_id,
                state.completed_phases.len()
            );
            if let Some(failure) = &state.failure {
                info!(
                    "Previous run stopped in phase {} at {}: {}",
                    failure.phase, failure.step, failure.error
                );
            }
            if state.metadata.plan_fingerprint != fingerprint {
                warn!("Module selection changed since this installation started; completed phases are not re-evaluated");
                self.emit(InstallEvent::PlanChanged {
                    previous: state.metadata.plan_fingerprint.clone(),
                    current: fingerprint.clone(),
                });
            }
        }

        self.emit(InstallEvent::RunStarted {
            run_id: state.metadata.run_id.to_string(),
            resumed,
            dry_run: self.options.dry_run,
            phases: plan.phases(),
            modules: plan.len(),
        });

        let mut installed = Vec::new();
        let mut satisfied = Vec::new();
        let mut skipped = Vec::new();
        let mut skipped_phases = Vec::new();

        for (phase, entries) in plan.by_phase() {
            if state.is_phase_completed(phase) {
                debug!("Phase {} already completed, skipping", phase);
                skipped_phases.push(phase);
                self.emit(InstallEvent::PhaseSkipped { phase });
                continue;
            }

            state.begin_phase(phase);
            if let Err(error) = self.checkpoint(&mut state) {
                return Err(self.halt(error, state, phase, "phase start"));
            }
            self.emit(InstallEvent::PhaseStarted {
                phase,
                modules: entries.len(),
            });
            let phase_started = Instant::now();

            for entry in entries {
                let Some(module) = self.manifest.get(&entry.id) else {
                    let error = SelectionError::unknown_module(&entry.id).into();
                    return Err(self.halt(error, state, phase, &entry.id));
                };

                match self.run_module(phase, module, &mut state).await {
                    Ok(ModuleOutcome::Satisfied) => satisfied.push(module.id.clone()),
                    Ok(ModuleOutcome::Installed) => installed.push(module.id.clone()),
                    Ok(ModuleOutcome::SkippedByPolicy) => skipped.push(module.id.clone()),
                    Err(ModuleError::Fatal(error)) => {
                        return Err(self.halt(error, state, phase, &module.id));
                    }
                    Err(ModuleError::Step { step, error })
                        if module.optional && error.is_recoverable_for_optional() =>
                    {
                        let message = error.to_string();
                        warn!("Optional module {} failed at {}: {}", module.id, step, message);
                        state.end_step();
                        state.record_warning(StepFailure {
                            phase,
                            module: module.id.clone(),
                            step: step.clone(),
                            error: message.clone(),
                        });
                        if let Err(error) = self.checkpoint(&mut state) {
                            return Err(self.halt(error, state, phase, &module.id));
                        }
                        self.emit(InstallEvent::ModuleWarning {
                            module: module.id.clone(),
                            step,
                            error: message,
                        });
                    }
                    Err(ModuleError::Step { step, error }) => {
                        return Err(self.fail(error, state, phase, module, step));
                    }
                }
            }

            let duration_secs = phase_started.elapsed().as_secs_f64();
            state.complete_phase(phase, duration_secs);
            if let Err(error) = self.checkpoint(&mut state) {
                return Err(self.halt(error, state, phase, "phase completion"));
            }
            self.emit(InstallEvent::PhaseCompleted {
                phase,
                duration_secs,
            });
        }

        let duration_secs = run_started.elapsed().as_secs_f64();
        self.emit(InstallEvent::RunCompleted { duration_secs });

        Ok(RunReport {
            state,
            outcome: EngineState::AllComplete,
            resumed,
            dry_run: self.options.dry_run,
            installed,
            satisfied,
            skipped,
            skipped_phases,
            duration_secs,
        })
    }

    /// Record a fatal step failure, flush it and build the failure
    fn fail(
        &self,
        error: Error,
        mut state: InstallationState,
        phase: u8,
        module: &Module,
        step: String,
    ) -> EngineFailure {
        let message = error.to_string();
        state.record_failure(StepFailure {
            phase,
            module: module.id.clone(),
            step: step.clone(),
            error: message.clone(),
        });
        // current_step is left pointing at the failed step for the next run
        if let Err(persist) = self.checkpoint(&mut state) {
            return self.halt(persist, state, phase, &step);
        }
        self.emit(InstallEvent::ModuleFailed {
            module: module.id.clone(),
            step: step.clone(),
            error: message.clone(),
        });
        EngineFailure {
            error,
            state: Some(state),
            outcome: EngineState::Failed {
                phase,
                step: format!("{}: {}", module.id, step),
                error: message,
            },
        }
    }

    /// Halt without touching the state file again
    fn halt(
        &self,
        error: Error,
        state: InstallationState,
        phase: u8,
        step: &str,
    ) -> EngineFailure {
        let message = error.to_string();
        EngineFailure {
            error,
            state: Some(state),
            outcome: EngineState::Failed {
                phase,
                step: step.to_string(),
                error: message,
            },
        }
    }

    async fn run_module(
        &self,
        phase: u8,
        module: &Module,
        state: &mut InstallationState,
    ) -> Result<ModuleOutcome, ModuleError> {
        let started = Instant::now();
        self.emit(InstallEvent::ModuleStarted {
            phase,
            module: module.id.clone(),
        });

        if self.probe(module, state).await? {
            debug!("{} already installed", module.id);
            self.emit(InstallEvent::ModuleSatisfied {
                module: module.id.clone(),
            });
            return Ok(ModuleOutcome::Satisfied);
        }

        for (i, action) in module.install.iter().enumerate() {
            let step = format!("install[{}]", i);
            if let StepResult::ToolSkipped(reason) =
                self.run_step(module, &step, action, false, state).await?
            {
                // Remaining install steps and every verify step are skipped
                debug!("{} not installed: installer skipped by policy", module.id);
                self.emit(InstallEvent::ModuleSkipped {
                    module: module.id.clone(),
                    reason,
                });
                return Ok(ModuleOutcome::SkippedByPolicy);
            }
        }

        for (i, action) in module.verify.iter().enumerate() {
            let step = format!("verify[{}]", i);
            self.run_step(module, &step, action, true, state).await?;
        }

        self.emit(InstallEvent::ModuleInstalled {
            module: module.id.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
        });
        Ok(ModuleOutcome::Installed)
    }

    /// Run `installed_check`; true when the module is already satisfied
    ///
    /// Probes are read-only and run even in dry-run mode.
    async fn probe(
        &self,
        module: &Module,
        state: &mut InstallationState,
    ) -> Result<bool, ModuleError> {
        let (Some(probe), Some(identity)) = (&module.installed_check, module.probe_identity())
        else {
            return Ok(false);
        };
        let step = "installed_check".to_string();

        self.begin_step(module, &step, state)?;
        let output = self
            .runner
            .run(identity, &ShellInvocation::inline(probe.command.clone()))
            .await
            .map_err(|error| ModuleError::Step {
                step: step.clone(),
                error: step_error(module, &step, error),
            })?;
        self.end_step(module, &step, state)?;

        debug!(
            "{}: installed_check exited {:?}",
            module.id, output.exit_code
        );
        Ok(output.success)
    }

    async fn run_step(
        &self,
        module: &Module,
        step: &str,
        action: &Action,
        verifying: bool,
        state: &mut InstallationState,
    ) -> Result<StepResult, ModuleError> {
        self.begin_step(module, step, state)?;

        if self.options.dry_run {
            debug!("[dry-run] {}: {} would run {}", module.id, step, action.summary());
            self.emit(InstallEvent::DryRunAction {
                module: module.id.clone(),
                step: format!("{} {}", step, action.summary()),
            });
            state.end_step();
            return Ok(StepResult::Done);
        }

        let as_step_error = |error: Error| ModuleError::Step {
            step: step.to_string(),
            error: step_error(module, step, error),
        };

        let result = match action {
            Action::Shell(body) => {
                let output = self
                    .runner
                    .run(module.run_as, &ShellInvocation::inline(body.clone()))
                    .await
                    .map_err(as_step_error)?;
                if !output.success {
                    let error = if verifying {
                        Error::verification(&module.id, step, output.exit_code, output.tail(20))
                    } else {
                        Error::execution(&module.id, step, output.exit_code, output.tail(20))
                    };
                    return Err(ModuleError::Step {
                        step: step.to_string(),
                        error,
                    });
                }
                StepResult::Done
            }
            Action::VerifiedInstaller(installer) => {
                match self
                    .verified
                    .run_verified(&module.id, installer, module.run_as)
                    .await
                    .map_err(as_step_error)?
                {
                    ScriptOutcome::Executed(_) => StepResult::Done,
                    ScriptOutcome::SkippedByPolicy(reason) => {
                        state.record_skipped_tool(SkippedTool {
                            tool: installer.tool.clone(),
                            module: module.id.clone(),
                            reason: reason.clone(),
                        });
                        self.emit(InstallEvent::ToolSkipped {
                            module: module.id.clone(),
                            tool: installer.tool.clone(),
                            reason: reason.clone(),
                        });
                        StepResult::ToolSkipped(reason)
                    }
                }
            }
        };

        self.end_step(module, step, state)?;
        Ok(result)
    }

    fn begin_step(
        &self,
        module: &Module,
        step: &str,
        state: &mut InstallationState,
    ) -> Result<(), ModuleError> {
        state.begin_step(format!("{}: {}", module.id, step));
        self.checkpoint(state).map_err(ModuleError::Fatal)?;
        self.emit(InstallEvent::StepStarted {
            module: module.id.clone(),
            step: step.to_string(),
        });
        Ok(())
    }

    fn end_step(
        &self,
        module: &Module,
        step: &str,
        state: &mut InstallationState,
    ) -> Result<(), ModuleError> {
        state.end_step();
        self.checkpoint(state).map_err(ModuleError::Fatal)?;
        self.emit(InstallEvent::StepCompleted {
            module: module.id.clone(),
            step: step.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StepResult {
    Done,
    /// A verified installer was skipped by the checksum policy
    ToolSkipped(String),
}

/// Normalise runner errors into module-scoped step errors
///
/// Privilege and policy errors keep their own type; transport-level failures
/// (spawn errors, timeouts) become execution failures of the step.
fn step_error(module: &Module, step: &str, error: Error) -> Error {
    match error {
        Error::Timeout { secs, .. } => Error::execution(
            &module.id,
            step,
            None,
            format!("timed out after {}s", secs),
        ),
        Error::Io(e) => Error::execution(&module.id, step, None, e.to_string()),
        other => other,
    }
}
