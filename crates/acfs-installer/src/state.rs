//! Persisted installation progress (`state.json`)
//!
//! One writer per state file: the engine holds an exclusive lock on a sidecar
//! `<state>.lock` for the whole run. Every write goes to a temp file in the
//! same directory, is fsynced, then renamed over the previous state, so a
//! crash at any point leaves either the old or the new checkpoint on disk.

use acfs_core::error::{Error, Result};
use acfs_core::types::InstallMode;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use tracing::{debug, warn};
use uuid::Uuid;

/// Current on-disk schema
pub const STATE_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub tool_version: String,
    pub mode: InstallMode,
    pub started_at: DateTime<Utc>,
    pub run_id: Uuid,
    /// Fingerprint of the plan this run was started with
    pub plan_fingerprint: String,
}

/// A failed step, fatal (`failure`) or absorbed by an optional module (`warnings`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub phase: u8,
    pub module: String,
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTool {
    pub tool: String,
    pub module: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationState {
    pub schema_version: u32,
    pub metadata: StateMetadata,
    #[serde(default)]
    pub completed_phases: BTreeSet<u8>,
    #[serde(default)]
    pub current_phase: Option<u8>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub failure: Option<StepFailure>,
    #[serde(default)]
    pub warnings: Vec<StepFailure>,
    #[serde(default)]
    pub skipped_tools: Vec<SkippedTool>,
    /// Phase → wall-clock seconds
    #[serde(default)]
    pub phase_durations: BTreeMap<u8, f64>,
    pub last_updated: DateTime<Utc>,
}

impl InstallationState {
    /// Fresh state for a new run
    pub fn new(mode: InstallMode, plan_fingerprint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            metadata: StateMetadata {
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                mode,
                started_at: now,
                run_id: Uuid::new_v4(),
                plan_fingerprint: plan_fingerprint.into(),
            },
            completed_phases: BTreeSet::new(),
            current_phase: None,
            current_step: None,
            failure: None,
            warnings: Vec::new(),
            skipped_tools: Vec::new(),
            phase_durations: BTreeMap::new(),
            last_updated: now,
        }
    }

    pub fn is_phase_completed(&self, phase: u8) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn begin_phase(&mut self, phase: u8) {
        self.current_phase = Some(phase);
        self.current_step = None;
    }

    pub fn begin_step(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
    }

    pub fn end_step(&mut self) {
        self.current_step = None;
    }

    /// Mark `phase` done and clear every in-progress marker
    pub fn complete_phase(&mut self, phase: u8, duration_secs: f64) {
        self.completed_phases.insert(phase);
        self.phase_durations.insert(phase, duration_secs);
        self.current_phase = None;
        self.current_step = None;
        self.failure = None;
    }

    pub fn record_failure(&mut self, failure: StepFailure) {
        self.failure = Some(failure);
    }

    pub fn record_warning(&mut self, warning: StepFailure) {
        self.warnings.push(warning);
    }

    /// Record a skipped tool once per (tool, module)
    pub fn record_skipped_tool(&mut self, skipped: SkippedTool) {
        let exists = self
            .skipped_tools
            .iter()
            .any(|s| s.tool == skipped.tool && s.module == skipped.module);
        if !exists {
            self.skipped_tools.push(skipped);
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Whether the last run halted on a fatal step failure
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Held for the duration of a run; dropping it releases the lock
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: Utf8PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Reads and atomically writes one state file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: Utf8PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.lock", self.path))
    }

    fn temp_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.tmp", self.path))
    }

    /// Take the single-writer lock, failing fast if another run holds it
    pub fn lock(&self) -> Result<StateLock> {
        let lock_path = self.lock_path();
        self.ensure_parent()?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::state_persistence(&lock_path, e.to_string()))?;

        let acquired = FileExt::try_lock_exclusive(&file)
            .map_err(|e| Error::state_persistence(&lock_path, e.to_string()))?;
        if !acquired {
            return Err(Error::ConcurrentRun {
                path: lock_path.to_string(),
            });
        }

        debug!("Acquired state lock {}", lock_path);
        Ok(StateLock {
            _file: file,
            path: lock_path,
        })
    }

    /// Load the persisted state, `None` when no run has started yet
    pub fn load(&self) -> Result<Option<InstallationState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::state_corruption(&self.path, e.to_string()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| Error::state_corruption(&self.path, e.to_string()))?;

        match value.get("schema_version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(STATE_SCHEMA_VERSION) => {}
            Some(v) => warn!(
                "State file {} has schema version {} (expected {}); proceeding",
                self.path, v, STATE_SCHEMA_VERSION
            ),
            None => warn!(
                "State file {} has no schema version; proceeding",
                self.path
            ),
        }

        let state: InstallationState = serde_json::from_value(value)
            .map_err(|e| Error::state_corruption(&self.path, e.to_string()))?;
        Ok(Some(state))
    }

    /// Atomically replace the state file (temp file, fsync, rename)
    pub fn save(&self, state: &InstallationState) -> Result<()> {
        self.ensure_parent()?;
        let temp_path = self.temp_path();
        let persist_err = |e: std::io::Error| Error::state_persistence(&self.path, e.to_string());

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::state_persistence(&self.path, e.to_string()))?;

        {
            let mut temp_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(persist_err)?;
            temp_file.write_all(&json).map_err(persist_err)?;
            temp_file.write_all(b"\n").map_err(persist_err)?;
            temp_file.sync_all().map_err(persist_err)?;
        }

        fs::rename(&temp_path, &self.path).map_err(persist_err)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// Discard the state file; returns whether one existed
    pub fn reset(&self) -> Result<bool> {
        let _lock = self.lock()?;
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .map_err(|e| Error::state_persistence(&self.path, e.to_string()))?;
        debug!("Removed state file {}", self.path);
        Ok(true)
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::state_persistence(parent, e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (StateStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp_dir.path().join("acfs/state.json")).unwrap();
        (StateStore::new(path), temp_dir)
    }

    #[test]
    fn test_load_missing_is_none() {
        let (store, _temp) = create_test_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let (store, _temp) = create_test_store();
        let mut state = InstallationState::new(InstallMode::Vibe, "abc");
        state.begin_phase(1);
        state.complete_phase(1, 2.5);
        state.record_skipped_tool(SkippedTool {
            tool: "ntm".to_string(),
            module: "tools.ntm".to_string(),
            reason: "checksum-mismatch".to_string(),
        });

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_complete_phase_clears_markers() {
        let mut state = InstallationState::new(InstallMode::Safe, "abc");
        state.begin_phase(3);
        state.begin_step("lang.bun: install");
        state.record_failure(StepFailure {
            phase: 3,
            module: "lang.bun".to_string(),
            step: "install".to_string(),
            error: "boom".to_string(),
        });
        state.complete_phase(3, 1.0);

        assert!(state.is_phase_completed(3));
        assert!(state.current_phase.is_none());
        assert!(state.current_step.is_none());
        assert!(!state.is_failed());
    }

    #[test]
    fn test_skipped_tool_recorded_once() {
        let mut state = InstallationState::new(InstallMode::Vibe, "abc");
        let skipped = SkippedTool {
            tool: "ntm".to_string(),
            module: "tools.ntm".to_string(),
            reason: "checksum-mismatch".to_string(),
        };
        state.record_skipped_tool(skipped.clone());
        state.record_skipped_tool(skipped);
        assert_eq!(state.skipped_tools.len(), 1);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let (store, _temp) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::StateCorruption { .. }));
        assert!(err.to_string().contains("acfs reset"));
    }

    #[test]
    fn test_second_lock_is_rejected() {
        let (store, _temp) = create_test_store();
        let held = store.lock().unwrap();
        let err = store.lock().unwrap_err();
        assert!(matches!(err, Error::ConcurrentRun { .. }));

        drop(held);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_reset() {
        let (store, _temp) = create_test_store();
        assert!(!store.reset().unwrap());
        store
            .save(&InstallationState::new(InstallMode::Vibe, "abc"))
            .unwrap();
        assert!(store.reset().unwrap());
        assert!(store.load().unwrap().is_none());
    }
}
