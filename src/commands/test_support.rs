//! Canned `CommandRunner` used by the unit tests of this module tree.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Mutex;

use super::runner::{CommandRunner, ProcessOutput};

/// Answers by first matching prefix; records every command line it receives.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, Option<ProcessOutput>)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(mut self, prefix: &str, stdout: &str) -> Self {
        self.rules.push((
            prefix.to_string(),
            Some(ProcessOutput {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                ..Default::default()
            }),
        ));
        self
    }

    pub fn fail(mut self, prefix: &str, code: i32) -> Self {
        self.rules.push((
            prefix.to_string(),
            Some(ProcessOutput {
                exit_code: Some(code),
                stderr: "failed".to_string(),
                ..Default::default()
            }),
        ));
        self
    }

    /// The runner itself errors (spawn failure).
    pub fn broken(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_string(), None));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command_line: &str) -> Result<ProcessOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command_line.to_string());
        }
        for (prefix, outcome) in &self.rules {
            if command_line.starts_with(prefix.as_str()) {
                return match outcome {
                    Some(out) => Ok(out.clone()),
                    None => bail!("failed to spawn `{command_line}`"),
                };
            }
        }
        Ok(ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }
}
