//! Progress events emitted by the phase engine
//!
//! The engine never prints. It reports through a [`ProgressObserver`]; the CLI
//! renders events, [`TracingObserver`] logs them, tests record them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Engine lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    NotStarted,
    PhaseRunning { phase: u8 },
    PhaseComplete { phase: u8 },
    AllComplete,
    Failed {
        phase: u8,
        step: String,
        error: String,
    },
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::PhaseRunning { phase } => write!(f, "running phase {}", phase),
            Self::PhaseComplete { phase } => write!(f, "phase {} complete", phase),
            Self::AllComplete => write!(f, "complete"),
            Self::Failed { phase, step, .. } => write!(f, "failed in phase {} at {}", phase, step),
        }
    }
}

/// Installation progress events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallEvent {
    /// Run started (fresh or resumed)
    RunStarted {
        run_id: String,
        resumed: bool,
        dry_run: bool,
        phases: Vec<u8>,
        modules: usize,
    },

    /// Persisted state was created for a different selection
    PlanChanged { previous: String, current: String },

    PhaseStarted { phase: u8, modules: usize },

    /// Phase was already completed by an earlier run
    PhaseSkipped { phase: u8 },

    PhaseCompleted { phase: u8, duration_secs: f64 },

    ModuleStarted { phase: u8, module: String },

    /// `installed_check` succeeded; install and verify skipped
    ModuleSatisfied { module: String },

    ModuleInstalled { module: String, duration_secs: f64 },

    StepStarted { module: String, step: String },

    StepCompleted { module: String, step: String },

    /// Dry run: the action would have executed
    DryRunAction { module: String, step: String },

    /// An upstream installer was skipped by the checksum policy
    ToolSkipped {
        module: String,
        tool: String,
        reason: String,
    },

    /// The module's installer was skipped by policy; it stays uninstalled
    ModuleSkipped { module: String, reason: String },

    /// Optional module failed; the run continues
    ModuleWarning {
        module: String,
        step: String,
        error: String,
    },

    /// Fatal step failure; the run halts
    ModuleFailed {
        module: String,
        step: String,
        error: String,
    },

    RunCompleted { duration_secs: f64 },
}

impl InstallEvent {
    /// Lifecycle state the engine enters with this event, if any
    ///
    /// `Failed` is carried by the engine's error rather than an event.
    pub fn engine_state(&self) -> Option<EngineState> {
        match self {
            Self::PhaseStarted { phase, .. } => Some(EngineState::PhaseRunning { phase: *phase }),
            Self::PhaseSkipped { phase } | Self::PhaseCompleted { phase, .. } => {
                Some(EngineState::PhaseComplete { phase: *phase })
            }
            Self::RunCompleted { .. } => Some(EngineState::AllComplete),
            _ => None,
        }
    }
}

/// Receives engine progress
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &InstallEvent);
}

/// Logs events with `tracing`
///
/// Failures log at WARN/ERROR, phase boundaries at INFO, steps at DEBUG.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &InstallEvent) {
        if let Some(state) = event.engine_state() {
            tracing::debug!(state = %state, "engine state");
        }
        match event {
            InstallEvent::RunStarted {
                run_id,
                resumed,
                dry_run,
                phases,
                modules,
            } => tracing::info!(
                run_id = %run_id,
                resumed = resumed,
                dry_run = dry_run,
                phases = ?phases,
                modules = modules,
                "installation started"
            ),
            InstallEvent::PlanChanged { previous, current } => tracing::warn!(
                previous = %previous,
                current = %current,
                "selection differs from the one this state was created with"
            ),
            InstallEvent::PhaseStarted { phase, modules } => {
                tracing::info!(phase = phase, modules = modules, "phase started")
            }
            InstallEvent::PhaseSkipped { phase } => {
                tracing::info!(phase = phase, "phase already completed, skipping")
            }
            InstallEvent::PhaseCompleted {
                phase,
                duration_secs,
            } => tracing::info!(phase = phase, duration_secs = duration_secs, "phase completed"),
            InstallEvent::ModuleStarted { phase, module } => {
                tracing::debug!(phase = phase, module = %module, "module started")
            }
            InstallEvent::ModuleSatisfied { module } => {
                tracing::info!(module = %module, "already installed")
            }
            InstallEvent::ModuleInstalled {
                module,
                duration_secs,
            } => tracing::info!(module = %module, duration_secs = duration_secs, "installed"),
            InstallEvent::StepStarted { module, step } => {
                tracing::debug!(module = %module, step = %step, "step started")
            }
            InstallEvent::StepCompleted { module, step } => {
                tracing::debug!(module = %module, step = %step, "step completed")
            }
            InstallEvent::DryRunAction { module, step } => {
                tracing::info!(module = %module, step = %step, "dry run: would execute")
            }
            InstallEvent::ToolSkipped {
                module,
                tool,
                reason,
            } => tracing::warn!(module = %module, tool = %tool, reason = %reason, "installer skipped"),
            InstallEvent::ModuleSkipped { module, reason } => {
                tracing::warn!(module = %module, reason = %reason, "module not installed")
            }
            InstallEvent::ModuleWarning {
                module,
                step,
                error,
            } => tracing::warn!(
                module = %module,
                step = %step,
                error = %error,
                "optional module failed, continuing"
            ),
            InstallEvent::ModuleFailed {
                module,
                step,
                error,
            } => tracing::error!(module = %module, step = %step, error = %error, "module failed"),
            InstallEvent::RunCompleted { duration_secs } => {
                tracing::info!(duration_secs = duration_secs, "installation complete")
            }
        }
    }
}

/// Forwards each event to several observers in order
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ProgressObserver for FanoutObserver {
    fn on_event(&self, event: &InstallEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<InstallEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InstallEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Lifecycle states in the order the engine entered them
    pub fn states(&self) -> Vec<EngineState> {
        self.events()
            .iter()
            .filter_map(InstallEvent::engine_state)
            .collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_event(&self, event: &InstallEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
