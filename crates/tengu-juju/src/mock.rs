//! Scripted in-memory runner
//!
//! Matches invocations by argv prefix and replays canned responses. Every
//! call is recorded so tests can assert on the exact command lines issued.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;
use crate::runner::{CommandRunner, Invocation, PendingCommand, classify_failure};

/// Canned outcome for a matched invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Exit zero with this stdout
    Output(String),
    /// Exit non-zero with this combined output
    Fail(String),
}

impl MockResponse {
    pub fn output(stdout: impl Into<String>) -> Self {
        Self::Output(stdout.into())
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self::Fail(output.into())
    }
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Arguments after the program name
    pub argv: Vec<String>,
    /// Contents of the file passed via `--config`, read at call time
    pub config_file: Option<String>,
}

impl RecordedCall {
    /// Whether argv starts with the given words
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.argv.len() >= prefix.len() && self.argv.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

struct Rule {
    prefix: Vec<String>,
    responses: VecDeque<MockResponse>,
}

/// A [`CommandRunner`] that never spawns processes
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for invocations whose argv starts with `prefix`.
    ///
    /// Responses queued on the same prefix are replayed in order; the last
    /// one repeats. Unmatched invocations succeed with empty output.
    pub fn on(&self, prefix: &[&str], response: MockResponse) -> &Self {
        let mut rules = self.rules.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.prefix.iter().map(String::as_str).eq(prefix.iter().copied()))
        {
            rule.responses.push_back(response);
        } else {
            rules.push(Rule {
                prefix: prefix.iter().map(|p| (*p).to_string()).collect(),
                responses: VecDeque::from([response]),
            });
        }
        self
    }

    /// Every invocation seen so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Invocations whose argv starts with `prefix`
    pub fn calls_matching(&self, prefix: &[&str]) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn respond(&self, invocation: &Invocation) -> Result<String> {
        let argv = invocation.to_argv();
        let config_file = invocation
            .flag_value("config")
            .and_then(|path| std::fs::read_to_string(path).ok());
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedCall {
                argv: argv.clone(),
                config_file,
            });

        let response = {
            let mut rules = self.rules.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            rules
                .iter_mut()
                .find(|r| argv.len() >= r.prefix.len() && argv.iter().zip(&r.prefix).all(|(a, p)| a == p))
                .and_then(|rule| {
                    if rule.responses.len() > 1 {
                        rule.responses.pop_front()
                    } else {
                        rule.responses.front().cloned()
                    }
                })
        };

        match response {
            None => Ok(String::new()),
            Some(MockResponse::Output(stdout)) => Ok(stdout),
            Some(MockResponse::Fail(output)) => Err(classify_failure(
                &output,
                &invocation.command_line(Path::new("juju")),
            )),
        }
    }
}

impl CommandRunner for MockRunner {
    fn output(&self, invocation: &Invocation) -> Result<String> {
        self.respond(invocation)
    }

    fn call(&self, invocation: &Invocation) -> Result<()> {
        self.respond(invocation).map(drop)
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn PendingCommand>> {
        let outcome = self.respond(invocation).map(drop);
        Ok(Box::new(Finished(outcome)))
    }
}

/// Spawned mock command; its outcome is decided at spawn time
struct Finished(Result<()>);

impl PendingCommand for Finished {
    fn wait(self: Box<Self>) -> Result<()> {
        self.0
    }
}
