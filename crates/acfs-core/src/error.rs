//! Error types for acfs-core
//!
//! The taxonomy is shared by every crate in the workspace so callers can tell
//! fatal from recoverable failures without matching on log text.

use std::fmt;
use thiserror::Error;

/// Result type alias using acfs-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the installer
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest integrity violation (always fatal, raised at load time)
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Bad selection input or a skip/dependency conflict
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Network failure retrieving an upstream installer script
    #[error("Failed to fetch installer '{tool}' from {url}: {message}")]
    Fetch {
        tool: String,
        url: String,
        message: String,
    },

    /// Fetched installer content does not match the registry hash
    #[error("Checksum mismatch for installer '{tool}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        tool: String,
        expected: String,
        actual: String,
    },

    /// The requested identity cannot be assumed by this process
    #[error("Cannot run as {identity}: {message}")]
    Privilege { identity: String, message: String },

    /// An install action exited non-zero
    #[error("{module}: {step} failed ({}): {output}", exit_label(.exit_code))]
    Execution {
        module: String,
        step: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// A verify action failed after install
    #[error("{module}: verification '{step}' failed ({}): {output}", exit_label(.exit_code))]
    Verification {
        module: String,
        step: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// A subprocess exceeded its time budget
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Persisted state cannot be read or parsed
    #[error(
        "Installation state at {path} is unreadable: {message}. \
         Discard it (acfs reset) and start a fresh install"
    )]
    StateCorruption { path: String, message: String },

    /// Persisted state cannot be written
    #[error("Failed to persist installation state to {path}: {message}")]
    StatePersistence { path: String, message: String },

    /// Another engine instance holds the state lock
    #[error("Another installer run is active (lock held on {path})")]
    ConcurrentRun { path: String },

    /// Operator chose to abort at an interactive prompt
    #[error("Installation aborted by operator at installer '{tool}'")]
    Aborted { tool: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

impl Error {
    /// Create a fetch error
    pub fn fetch(
        tool: impl Into<String>,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            tool: tool.into(),
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a checksum mismatch error
    pub fn checksum_mismatch(
        tool: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            tool: tool.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a privilege error
    pub fn privilege(identity: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Privilege {
            identity: identity.to_string(),
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(
        module: impl Into<String>,
        step: impl Into<String>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self::Execution {
            module: module.into(),
            step: step.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Create a verification error
    pub fn verification(
        module: impl Into<String>,
        step: impl Into<String>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self::Verification {
            module: module.into(),
            step: step.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create a state corruption error
    pub fn state_corruption(path: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::StateCorruption {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Create a state persistence error
    pub fn state_persistence(path: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::StatePersistence {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether an optional module may absorb this error and let the run continue.
    ///
    /// Only failures of the module's own work qualify. A checksum mismatch
    /// reaching the engine comes from a critical installer and halts the run,
    /// as do privilege errors, state file errors, an operator abort and
    /// manifest or selection errors.
    pub fn is_recoverable_for_optional(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::Execution { .. }
                | Self::Verification { .. }
                | Self::Timeout { .. }
        )
    }
}

/// Manifest integrity violations.
///
/// Each variant names the offending module (where there is one) and the rule
/// it broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{module}: invalid module id (expected dotted lowercase, e.g. lang.bun)")]
    InvalidId { module: String },

    #[error("{module}: phase {phase} is outside 1..=10")]
    PhaseOutOfRange { module: String, phase: u8 },

    #[error("{module}: duplicate module id")]
    DuplicateId { module: String },

    #[error("{module}: depends on unknown module '{dependency}'")]
    UnknownDependency { module: String, dependency: String },

    #[error("{module}: a module cannot depend on itself")]
    SelfDependency { module: String },

    #[error("dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error(
        "{module} (phase {phase}) depends on {dependency} which is scheduled later (phase {dependency_phase})"
    )]
    PhaseInversion {
        module: String,
        phase: u8,
        dependency: String,
        dependency_phase: u8,
    },

    #[error("{module} (phase {phase}) is declared after a phase {previous_phase} module")]
    PhaseOrder {
        module: String,
        phase: u8,
        previous_phase: u8,
    },

    #[error("{module} is declared before its dependency {dependency}")]
    DeclarationOrder { module: String, dependency: String },

    #[error("{module}: no checksum registry entry for installer '{tool}'")]
    MissingChecksum { module: String, tool: String },

    #[error("checksum registry entry '{tool}': {message}")]
    InvalidChecksumEntry { tool: String, message: String },

    #[error("{} invalid field(s):\n{}", .0.len(), format_fields(.0))]
    Fields(Vec<FieldError>),
}

impl ValidationError {
    /// The module id the violation is attributed to, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::InvalidId { module }
            | Self::PhaseOutOfRange { module, .. }
            | Self::DuplicateId { module }
            | Self::UnknownDependency { module, .. }
            | Self::SelfDependency { module }
            | Self::PhaseInversion { module, .. }
            | Self::PhaseOrder { module, .. }
            | Self::DeclarationOrder { module, .. }
            | Self::MissingChecksum { module, .. } => Some(module),
            Self::DependencyCycle { chain } => chain.first().map(String::as_str),
            Self::InvalidChecksumEntry { .. } | Self::Fields(_) => None,
        }
    }
}

/// A single structural problem found while reading raw manifest data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Location, e.g. `modules[3].phase`
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn format_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Invalid selection input, reported before anything executes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Unknown module: {id}")]
    UnknownModule { id: String },

    #[error("Phase {phase} has no modules")]
    UnknownPhase { phase: u8 },

    #[error(
        "Cannot skip {dependency}: required by {dependent} ({})",
        .chain.join(" -> ")
    )]
    SkippedDependency {
        dependent: String,
        dependency: String,
        chain: Vec<String>,
    },
}

impl SelectionError {
    /// Create an unknown module error
    pub fn unknown_module(id: impl Into<String>) -> Self {
        Self::UnknownModule { id: id.into() }
    }

    /// Create a skipped dependency error from the walked chain
    ///
    /// The chain runs from the dependent to the skipped dependency.
    pub fn skipped_dependency(chain: Vec<String>) -> Self {
        let dependent = chain.first().cloned().unwrap_or_default();
        let dependency = chain.last().cloned().unwrap_or_default();
        Self::SkippedDependency {
            dependent,
            dependency,
            chain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display() {
        let err = Error::execution("lang.bun", "install[0]", Some(127), "bun: not found");
        assert_eq!(
            err.to_string(),
            "lang.bun: install[0] failed (exit code 127): bun: not found"
        );

        let err = Error::verification("lang.bun", "verify[1]", None, "killed");
        assert!(err.to_string().contains("no exit code"));
    }

    #[test]
    fn test_recoverable_for_optional() {
        let absorbed = [
            Error::fetch("ntm", "https://example.com/ntm.sh", "HTTP 503"),
            Error::execution("tools.ntm", "install[0]", Some(1), ""),
            Error::verification("tools.ntm", "verify[0]", Some(1), ""),
            Error::timeout("action", 30),
        ];
        for err in &absorbed {
            assert!(err.is_recoverable_for_optional(), "{:?}", err);
        }

        let fatal = [
            Error::checksum_mismatch("bun", "aa", "bb"),
            Error::privilege("root", "no passwordless sudo"),
            Error::Aborted {
                tool: "ntm".to_string(),
            },
            Error::state_persistence("/tmp/state.json", "read-only file system"),
        ];
        for err in &fatal {
            assert!(!err.is_recoverable_for_optional(), "{:?}", err);
        }
    }

    #[test]
    fn test_cycle_display() {
        let err = ValidationError::DependencyCycle {
            chain: vec!["a.x".into(), "a.y".into(), "a.x".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a.x -> a.y -> a.x");
        assert_eq!(err.module(), Some("a.x"));
    }

    #[test]
    fn test_skipped_dependency_from_chain() {
        let err = SelectionError::skipped_dependency(vec![
            "agents.claude".to_string(),
            "lang.bun".to_string(),
        ]);
        match &err {
            SelectionError::SkippedDependency {
                dependent,
                dependency,
                ..
            } => {
                assert_eq!(dependent, "agents.claude");
                assert_eq!(dependency, "lang.bun");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(err.to_string().contains("agents.claude -> lang.bun"));
    }

    #[test]
    fn test_field_errors_display() {
        let err = ValidationError::Fields(vec![
            FieldError::new("modules[0].phase", "must be between 1 and 10"),
            FieldError::new("modules[2].run_as", "unknown variant `admin`"),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 invalid field(s)"));
        assert!(msg.contains("modules[2].run_as"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
