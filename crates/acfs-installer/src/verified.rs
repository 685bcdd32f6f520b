//! Checksum-verified execution of upstream installer scripts
//!
//! Every network-sourced installer goes through [`VerifiedScriptExecutor`]:
//! fetch, hash, compare against the [`ChecksumRegistry`], then either run the
//! bytes that were hashed or apply the criticality policy. The content that
//! runs is always exactly the content that was checked.

use crate::context::{CommandOutput, CommandRunner, ShellInvocation};
use acfs_core::error::{Error, Result, ValidationError};
use acfs_core::types::{Criticality, InstallerRef, NetworkConfig, RunAs};
use acfs_core::ChecksumRegistry;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reason recorded when a recommended installer is skipped on mismatch
pub const CHECKSUM_MISMATCH_REASON: &str = "checksum-mismatch";

/// Lowercase hex SHA-256 of `content`
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Retrieves installer script bytes
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    async fn fetch(&self, tool: &str, url: &str) -> Result<Vec<u8>>;
}

/// HTTPS fetcher with an explicit per-request timeout
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        let timeout = Duration::from_secs(network.fetch_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(network.user_agent.clone())
            .build()
            .map_err(|e| Error::invalid_config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    /// Pre-flight connectivity check; any HTTP response counts as reachable
    pub async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.client.head(url).timeout(timeout).send().await {
            Ok(response) => {
                debug!("Connectivity probe {} -> HTTP {}", url, response.status());
                true
            }
            Err(e) => {
                warn!("Connectivity probe to {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ScriptFetcher for HttpFetcher {
    async fn fetch(&self, tool: &str, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching installer '{}' from {}", tool, url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::fetch(tool, url, format!("timed out after {}s", self.timeout.as_secs()))
            } else {
                Error::fetch(tool, url, e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::fetch(
                tool,
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(tool, url, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Operator decision on a recommended-installer mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchChoice {
    Skip,
    Abort,
    ExecuteAnyway,
}

/// Asks the operator what to do about a checksum mismatch
pub trait MismatchPrompt: Send + Sync {
    fn on_mismatch(&self, tool: &str, url: &str, expected: &str, actual: &str) -> MismatchChoice;
}

/// Whether an operator is available to answer prompts
#[derive(Clone, Default)]
pub enum Interaction {
    /// Unattended run (`--yes`); policies apply without asking
    #[default]
    Automated,
    Interactive(Arc<dyn MismatchPrompt>),
}

impl std::fmt::Debug for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automated => write!(f, "Automated"),
            Self::Interactive(_) => write!(f, "Interactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Executed(CommandOutput),
    /// Not executed; the reason is recorded in `skipped_tools`
    SkippedByPolicy(String),
}

/// Fetch → verify → run, with the criticality policy on mismatch
pub struct VerifiedScriptExecutor {
    registry: Arc<ChecksumRegistry>,
    fetcher: Arc<dyn ScriptFetcher>,
    runner: Arc<dyn CommandRunner>,
    interaction: Interaction,
}

impl VerifiedScriptExecutor {
    pub fn new(
        registry: Arc<ChecksumRegistry>,
        fetcher: Arc<dyn ScriptFetcher>,
        runner: Arc<dyn CommandRunner>,
        interaction: Interaction,
    ) -> Self {
        Self {
            registry,
            fetcher,
            runner,
            interaction,
        }
    }

    pub fn registry(&self) -> &ChecksumRegistry {
        &self.registry
    }

    /// Run the installer referenced by `module` as `identity`
    pub async fn run_verified(
        &self,
        module: &str,
        installer: &InstallerRef,
        identity: RunAs,
    ) -> Result<ScriptOutcome> {
        let tool = installer.tool.as_str();
        let entry = self
            .registry
            .get(tool)
            .ok_or_else(|| ValidationError::MissingChecksum {
                module: module.to_string(),
                tool: tool.to_string(),
            })?;

        let content = self.fetcher.fetch(tool, &entry.url).await?;
        let actual = sha256_hex(&content);

        if !actual.eq_ignore_ascii_case(&entry.sha256) {
            match self.on_mismatch(tool, &entry.url, &entry.sha256, &actual, entry.criticality)? {
                Some(reason) => return Ok(ScriptOutcome::SkippedByPolicy(reason)),
                None => warn!(
                    "Executing installer '{}' despite checksum mismatch (expected {}, got {}): risk acknowledged by operator",
                    tool, entry.sha256, actual
                ),
            }
        } else {
            debug!("Installer '{}' verified (SHA-256: {})", tool, actual);
        }

        let invocation = ShellInvocation::Script {
            runner: installer.runner,
            content,
            args: installer.args.clone(),
        };
        let output = self.runner.run(identity, &invocation).await?;
        if !output.success {
            return Err(Error::execution(
                module,
                format!("verified installer '{}'", tool),
                output.exit_code,
                output.tail(20),
            ));
        }

        info!("Installer '{}' completed for {}", tool, module);
        Ok(ScriptOutcome::Executed(output))
    }

    /// `Ok(Some(reason))` to skip, `Ok(None)` to execute anyway
    fn on_mismatch(
        &self,
        tool: &str,
        url: &str,
        expected: &str,
        actual: &str,
        criticality: Criticality,
    ) -> Result<Option<String>> {
        if criticality == Criticality::Critical {
            return Err(Error::checksum_mismatch(tool, expected, actual));
        }

        match &self.interaction {
            Interaction::Automated => {
                warn!(
                    "Skipping recommended installer '{}': checksum mismatch (expected {}, got {})",
                    tool, expected, actual
                );
                Ok(Some(CHECKSUM_MISMATCH_REASON.to_string()))
            }
            Interaction::Interactive(prompt) => {
                match prompt.on_mismatch(tool, url, expected, actual) {
                    MismatchChoice::Skip => Ok(Some(CHECKSUM_MISMATCH_REASON.to_string())),
                    MismatchChoice::Abort => Err(Error::Aborted {
                        tool: tool.to_string(),
                    }),
                    MismatchChoice::ExecuteAnyway => Ok(None),
                }
            }
        }
    }
}
