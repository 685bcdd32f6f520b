//! Execution context: run a shell body under a given identity
//!
//! Callers ask for `root`, `target_user` or `current_user` and never see how
//! the switch happens. [`ShellContext`] detects the caller's privileges once
//! and refuses (with [`Error::Privilege`]) rather than silently running under
//! the wrong identity.

use acfs_core::error::{Error, Result};
use acfs_core::types::{InstallMode, RunAs, ScriptRunner};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// What to hand the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInvocation {
    /// `bash -c <body>`; pipes, heredocs and multi-line bodies all work
    Inline(String),
    /// `<runner> -s -- <args>` with the content on stdin, byte for byte
    Script {
        runner: ScriptRunner,
        content: Vec<u8>,
        args: Vec<String>,
    },
}

impl ShellInvocation {
    pub fn inline(body: impl Into<String>) -> Self {
        Self::Inline(body.into())
    }

    fn argv(&self) -> Vec<String> {
        match self {
            Self::Inline(body) => vec!["bash".to_string(), "-c".to_string(), body.clone()],
            Self::Script { runner, args, .. } => {
                let mut argv = vec![
                    runner.program().to_string(),
                    "-s".to_string(),
                    "--".to_string(),
                ];
                argv.extend(args.iter().cloned());
                argv
            }
        }
    }

    fn stdin(&self) -> Option<&[u8]> {
        match self {
            Self::Inline(_) => None,
            Self::Script { content, .. } => Some(content.as_slice()),
        }
    }
}

/// Captured result of one shell invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    pub fn failure(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
        }
    }

    /// Last lines of stderr (or stdout when stderr is empty) for error reports
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let collected: Vec<&str> = source.trim_end().lines().collect();
        let start = collected.len().saturating_sub(lines);
        collected[start..].join("\n")
    }
}

/// Runs shell bodies as a requested identity
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, identity: RunAs, invocation: &ShellInvocation) -> Result<CommandOutput>;
}

/// Caller identity, detected once per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privileges {
    pub user: String,
    pub uid: u32,
    pub passwordless_sudo: bool,
}

impl Privileges {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Probe `id -un`, `id -u` and, when `sudo` is on PATH, `sudo -n true`
    pub async fn detect() -> Result<Self> {
        let user = capture("id", &["-un"]).await?;
        let uid = capture("id", &["-u"])
            .await?
            .parse::<u32>()
            .map_err(|e| Error::privilege("current_user", format!("unreadable uid: {}", e)))?;

        let passwordless_sudo = if uid == 0 {
            true
        } else if which::which("sudo").is_ok() {
            Command::new("sudo")
                .args(["-n", "true"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|status| status.success())
                .unwrap_or(false)
        } else {
            false
        };

        debug!(
            "Detected caller {} (uid {}), passwordless sudo: {}",
            user, uid, passwordless_sudo
        );
        Ok(Self {
            user,
            uid,
            passwordless_sudo,
        })
    }
}

async fn capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::privilege(
            "current_user",
            format!("`{} {}` failed", program, args.join(" ")),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Set on the child directly; forwarded through `env` under sudo
    pub env: Vec<(String, String)>,
}

/// Production [`CommandRunner`] backed by `bash` and `sudo`
#[derive(Debug, Clone)]
pub struct ShellContext {
    privileges: Privileges,
    target_user: String,
    target_home: String,
    mode: InstallMode,
    timeout: Option<Duration>,
}

impl ShellContext {
    /// Detect the caller's privileges and build a context
    pub async fn detect(
        target_user: impl Into<String>,
        target_home: impl Into<String>,
        mode: InstallMode,
    ) -> Result<Self> {
        let privileges = Privileges::detect().await?;
        Ok(Self::with_privileges(
            privileges,
            target_user,
            target_home,
            mode,
        ))
    }

    pub fn with_privileges(
        privileges: Privileges,
        target_user: impl Into<String>,
        target_home: impl Into<String>,
        mode: InstallMode,
    ) -> Self {
        Self {
            privileges,
            target_user: target_user.into(),
            target_home: target_home.into(),
            mode,
            timeout: None,
        }
    }

    /// Kill any action that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn privileges(&self) -> &Privileges {
        &self.privileges
    }

    pub fn target_user(&self) -> &str {
        &self.target_user
    }

    fn action_env(&self) -> Vec<(String, String)> {
        vec![
            ("ACFS_MODE".to_string(), self.mode.to_string()),
            ("TARGET_USER".to_string(), self.target_user.clone()),
            ("TARGET_HOME".to_string(), self.target_home.clone()),
        ]
    }

    /// Decide how to run `invocation` as `identity` without running it
    pub fn prepare(&self, identity: RunAs, invocation: &ShellInvocation) -> Result<PreparedCommand> {
        let shell = invocation.argv();
        let env = self.action_env();
        let p = &self.privileges;

        let sudo_prefix: Option<Vec<String>> = match identity {
            RunAs::CurrentUser => None,
            RunAs::Root if p.is_root() => None,
            RunAs::Root if p.passwordless_sudo => Some(vec!["-n".to_string()]),
            RunAs::Root => {
                return Err(Error::privilege(
                    identity,
                    format!("{} is not root and has no passwordless sudo", p.user),
                ))
            }
            RunAs::TargetUser if p.user == self.target_user => None,
            RunAs::TargetUser if p.is_root() => Some(vec![
                "-u".to_string(),
                self.target_user.clone(),
                "-H".to_string(),
            ]),
            RunAs::TargetUser if p.passwordless_sudo => Some(vec![
                "-n".to_string(),
                "-u".to_string(),
                self.target_user.clone(),
                "-H".to_string(),
            ]),
            RunAs::TargetUser => {
                return Err(Error::privilege(
                    identity,
                    format!(
                        "{} cannot switch to {} without passwordless sudo",
                        p.user, self.target_user
                    ),
                ))
            }
        };

        Ok(match sudo_prefix {
            None => {
                let mut shell = shell.into_iter();
                PreparedCommand {
                    program: shell.next().unwrap_or_else(|| "bash".to_string()),
                    args: shell.collect(),
                    env,
                }
            }
            Some(mut args) => {
                args.push("env".to_string());
                args.extend(env.iter().map(|(k, v)| format!("{}={}", k, v)));
                args.extend(shell);
                PreparedCommand {
                    program: "sudo".to_string(),
                    args,
                    env: Vec::new(),
                }
            }
        })
    }
}

#[async_trait]
impl CommandRunner for ShellContext {
    async fn run(&self, identity: RunAs, invocation: &ShellInvocation) -> Result<CommandOutput> {
        let prepared = self.prepare(identity, invocation)?;
        debug!("Running as {}: {} {:?}", identity, prepared.program, prepared.args);

        let mut cmd = Command::new(&prepared.program);
        cmd.args(&prepared.args)
            .envs(prepared.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        // Feed stdin while draining stdout/stderr: the shell executes the
        // script as it reads it and may fill the output pipes first.
        let stdin = child.stdin.take();
        let content = invocation.stdin().map(<[u8]>::to_vec);
        let feeding = async move {
            if let (Some(content), Some(mut stdin)) = (content, stdin) {
                if let Err(e) = stdin.write_all(&content).await {
                    debug!("Script stdin closed early: {}", e);
                }
            }
        };
        let waiting = async move {
            let ((), output) = tokio::join!(feeding, child.wait_with_output());
            output
        };

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!("Action as {} exceeded {}s, killed", identity, limit.as_secs());
                    return Err(Error::timeout(
                        format!("action as {}", identity),
                        limit.as_secs(),
                    ));
                }
            },
            None => waiting.await?,
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
        })
    }
}
