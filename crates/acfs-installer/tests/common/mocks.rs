//! Mock implementations for testing
//!
//! Stand-ins for the process runner, the network fetcher and the operator
//! prompt. Every mock records what it was asked to do.

#![allow(dead_code)]

use acfs_core::error::{Error, Result};
use acfs_core::types::RunAs;
use acfs_installer::context::{CommandOutput, CommandRunner, ShellInvocation};
use acfs_installer::verified::{MismatchChoice, MismatchPrompt, ScriptFetcher};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Record of one runner invocation
#[derive(Clone, Debug)]
pub struct RecordedInvocation {
    pub identity: RunAs,
    pub invocation: ShellInvocation,
}

impl RecordedInvocation {
    /// Exact bytes handed to the shell
    pub fn bytes(&self) -> &[u8] {
        match &self.invocation {
            ShellInvocation::Inline(body) => body.as_bytes(),
            ShellInvocation::Script { content, .. } => content,
        }
    }

    /// Inline body or script content, for substring matching
    pub fn body(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }
}

enum MockResponse {
    Output(CommandOutput),
    Error(fn() -> Error),
}

/// Mock command runner
///
/// Responses are matched by substring of the shell body, first match wins.
/// Unmatched commands succeed with empty output.
#[derive(Clone, Default)]
pub struct MockRunner {
    responses: Arc<Mutex<Vec<(String, MockResponse)>>>,
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with `exit_code`
    pub fn fail_on(&self, pattern: &str, stderr: &str, exit_code: i32) {
        self.responses.lock().unwrap().push((
            pattern.to_string(),
            MockResponse::Output(CommandOutput::failure(stderr, exit_code)),
        ));
    }

    /// Commands containing `pattern` succeed with `stdout`
    pub fn succeed_on(&self, pattern: &str, stdout: &str) {
        self.responses.lock().unwrap().push((
            pattern.to_string(),
            MockResponse::Output(CommandOutput::success(stdout)),
        ));
    }

    /// Commands containing `pattern` return a runner error
    pub fn error_on(&self, pattern: &str, error: fn() -> Error) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), MockResponse::Error(error)));
    }

    /// Drop every scripted response
    pub fn clear(&self) {
        self.responses.lock().unwrap().clear();
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Bodies of every invocation, in order
    pub fn bodies(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(RecordedInvocation::body)
            .collect()
    }

    /// Whether any invocation body contains `pattern`
    pub fn ran(&self, pattern: &str) -> bool {
        self.bodies().iter().any(|b| b.contains(pattern))
    }

    /// Whether some invocation handed the shell exactly `content`
    pub fn ran_bytes(&self, content: &[u8]) -> bool {
        self.invocations().iter().any(|i| i.bytes() == content)
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.bodies().iter().filter(|b| b.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, identity: RunAs, invocation: &ShellInvocation) -> Result<CommandOutput> {
        let recorded = RecordedInvocation {
            identity,
            invocation: invocation.clone(),
        };
        let body = recorded.body();
        self.invocations.lock().unwrap().push(recorded);

        let responses = self.responses.lock().unwrap();
        for (pattern, response) in responses.iter() {
            if body.contains(pattern.as_str()) {
                return match response {
                    MockResponse::Output(output) => Ok(output.clone()),
                    MockResponse::Error(make) => Err(make()),
                };
            }
        }
        Ok(CommandOutput::success(""))
    }
}

/// Mock installer fetcher keyed by URL
#[derive(Clone, Default)]
pub struct MockFetcher {
    content: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, content: &[u8]) {
        self.content
            .lock()
            .unwrap()
            .insert(url.to_string(), content.to_vec());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptFetcher for MockFetcher {
    async fn fetch(&self, tool: &str, url: &str) -> Result<Vec<u8>> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.content
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::fetch(tool, url, "HTTP 404 Not Found"))
    }
}

/// Prompt that always answers the same way and counts questions
#[derive(Clone)]
pub struct ScriptedPrompt {
    choice: MismatchChoice,
    asked: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrompt {
    pub fn new(choice: MismatchChoice) -> Self {
        Self {
            choice,
            asked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tools the operator was asked about
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl MismatchPrompt for ScriptedPrompt {
    fn on_mismatch(&self, tool: &str, _url: &str, _expected: &str, _actual: &str) -> MismatchChoice {
        self.asked.lock().unwrap().push(tool.to_string());
        self.choice
    }
}
