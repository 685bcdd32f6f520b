//! Module type definitions matching the manifest YAML layout

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity under which a module's actions execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAs {
    Root,
    #[default]
    TargetUser,
    CurrentUser,
}

impl fmt::Display for RunAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunAs::Root => write!(f, "root"),
            RunAs::TargetUser => write!(f, "target_user"),
            RunAs::CurrentUser => write!(f, "current_user"),
        }
    }
}

/// Installer posture recorded in state and exported to actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Passwordless sudo, permissive agent defaults
    #[default]
    Vibe,
    /// Conservative defaults, confirmations kept
    Safe,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Vibe => write!(f, "vibe"),
            InstallMode::Safe => write!(f, "safe"),
        }
    }
}

impl std::str::FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vibe" => Ok(InstallMode::Vibe),
            "safe" => Ok(InstallMode::Safe),
            other => Err(format!("unknown mode '{}' (expected vibe or safe)", other)),
        }
    }
}

/// Interpreter used to run a fetched installer script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptRunner {
    #[default]
    Bash,
    Sh,
}

impl ScriptRunner {
    pub fn program(self) -> &'static str {
        match self {
            ScriptRunner::Bash => "bash",
            ScriptRunner::Sh => "sh",
        }
    }
}

/// Reference to an upstream installer held in the checksum registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerRef {
    /// Registry key, e.g. `bun`
    pub tool: String,

    #[serde(default)]
    pub runner: ScriptRunner,

    /// Arguments passed to the script after `--`
    #[serde(default)]
    pub args: Vec<String>,
}

/// One install or verify step
///
/// In YAML a bare string is a shell body; `{ verified_installer: {...} }`
/// routes through the checksum-verified script path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ActionSpec", into = "ActionSpec")]
pub enum Action {
    /// Literal shell body, single or multi-line
    Shell(String),
    /// Network-sourced installer, verified before execution
    VerifiedInstaller(InstallerRef),
}

impl Action {
    /// Short human label used in step descriptions and logs
    pub fn summary(&self) -> String {
        match self {
            Action::Shell(body) => {
                let first = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                let first = first.trim();
                if first.chars().count() > 60 || body.trim().lines().count() > 1 {
                    let short: String = first.chars().take(57).collect();
                    format!("{}...", short)
                } else {
                    first.to_string()
                }
            }
            Action::VerifiedInstaller(installer) => {
                format!("verified installer '{}'", installer.tool)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ActionSpec {
    Shell(String),
    Installer { verified_installer: InstallerRef },
}

impl From<ActionSpec> for Action {
    fn from(spec: ActionSpec) -> Self {
        match spec {
            ActionSpec::Shell(body) => Action::Shell(body),
            ActionSpec::Installer { verified_installer } => {
                Action::VerifiedInstaller(verified_installer)
            }
        }
    }
}

impl From<Action> for ActionSpec {
    fn from(action: Action) -> Self {
        match action {
            Action::Shell(body) => ActionSpec::Shell(body),
            Action::VerifiedInstaller(verified_installer) => {
                ActionSpec::Installer { verified_installer }
            }
        }
    }
}

/// Read-only "already installed?" probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProbeSpec", into = "ProbeSpec")]
pub struct Probe {
    pub command: String,
    /// Falls back to the owning module's identity
    pub run_as: Option<RunAs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ProbeSpec {
    Command(String),
    Full {
        command: String,
        #[serde(default)]
        run_as: Option<RunAs>,
    },
}

impl From<ProbeSpec> for Probe {
    fn from(spec: ProbeSpec) -> Self {
        match spec {
            ProbeSpec::Command(command) => Probe {
                command,
                run_as: None,
            },
            ProbeSpec::Full { command, run_as } => Probe { command, run_as },
        }
    }
}

impl From<Probe> for ProbeSpec {
    fn from(probe: Probe) -> Self {
        match probe.run_as {
            None => ProbeSpec::Command(probe.command),
            Some(run_as) => ProbeSpec::Full {
                command: probe.command,
                run_as: Some(run_as),
            },
        }
    }
}

/// One installable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Dotted lowercase id, e.g. `lang.bun`
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Coarse ordering bucket (1..=10)
    pub phase: u8,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub run_as: RunAs,

    #[serde(default)]
    pub install: Vec<Action>,

    #[serde(default)]
    pub verify: Vec<Action>,

    #[serde(default)]
    pub installed_check: Option<Probe>,

    /// Failures are downgraded to warnings
    #[serde(default)]
    pub optional: bool,

    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,
}

fn default_enabled() -> bool {
    true
}

impl Module {
    /// First dotted segment of the id
    pub fn category(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Identity for the installed_check probe
    pub fn probe_identity(&self) -> Option<RunAs> {
        self.installed_check
            .as_ref()
            .map(|probe| probe.run_as.unwrap_or(self.run_as))
    }

    /// Every verified installer referenced by install or verify steps
    pub fn installer_refs(&self) -> impl Iterator<Item = &InstallerRef> {
        self.install
            .iter()
            .chain(self.verify.iter())
            .filter_map(|action| match action {
                Action::VerifiedInstaller(installer) => Some(installer),
                Action::Shell(_) => None,
            })
    }
}

/// Global defaults shared by all modules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDefaults {
    #[serde(default = "default_target_user")]
    pub target_user: String,

    #[serde(default)]
    pub target_home: Option<String>,

    #[serde(default)]
    pub mode: InstallMode,
}

fn default_target_user() -> String {
    "ubuntu".to_string()
}

impl Default for ManifestDefaults {
    fn default() -> Self {
        Self {
            target_user: default_target_user(),
            target_home: None,
            mode: InstallMode::default(),
        }
    }
}

impl ManifestDefaults {
    /// Home directory of the target user (`/home/<user>` unless overridden)
    pub fn target_home(&self) -> String {
        self.target_home.clone().unwrap_or_else(|| {
            if self.target_user == "root" {
                "/root".to_string()
            } else {
                format!("/home/{}", self.target_user)
            }
        })
    }
}
