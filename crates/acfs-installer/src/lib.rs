//! Module installation for ACFS
//!
//! This crate handles:
//! - Module selection (manifest + flags → execution plan)
//! - Identity-aware shell execution
//! - Checksum-verified upstream installers
//! - Checkpointed, resumable phase execution
//! - Persisted installation state

pub mod context;
pub mod engine;
pub mod events;
pub mod selection;
pub mod state;
pub mod verified;

pub use context::{CommandOutput, CommandRunner, Privileges, ShellContext, ShellInvocation};
pub use engine::{EngineFailure, EngineOptions, PhaseEngine, RunReport};
pub use events::{EngineState, InstallEvent, ProgressObserver, TracingObserver};
pub use selection::{resolve, ExecutionPlan, SelectionInput};
pub use state::{InstallationState, StateStore};
pub use verified::{
    HttpFetcher, Interaction, MismatchChoice, MismatchPrompt, ScriptFetcher,
    VerifiedScriptExecutor,
};
