//! Scripted command runner for tests (no tools required on the host).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{EnvError, Result};
use crate::runner::{CommandOutput, CommandRunner};

/// A [`CommandRunner`] that replays canned responses keyed by the full
/// command line, recording every invocation in order.
///
/// Responses queue per command line and are consumed in order (the last
/// one repeats). A `None` response — or no script at all — behaves as a
/// missing binary ([`EnvError::ToolNotFound`]), which is what a bare CI
/// image looks like to the bootstrapper.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, Vec<Option<CommandOutput>>>>,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(program: &str, args: &[&str]) -> String {
        std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Script a response for `command_line` (e.g. `"python --version"`).
    pub fn script(&self, command_line: &str, output: CommandOutput) {
        self.push(command_line, Some(output));
    }

    /// Script one missing-binary response for `command_line` (the tool is
    /// not installed yet at that point in the sequence).
    pub fn script_missing(&self, command_line: &str) {
        self.push(command_line, None);
    }

    fn push(&self, command_line: &str, response: Option<CommandOutput>) {
        self.responses
            .lock()
            .unwrap()
            .entry(command_line.to_string())
            .or_default()
            .push(response);
    }

    /// All invocations seen so far, as full command lines in order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of times `command_line` was invoked.
    pub fn count(&self, command_line: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.as_str() == command_line)
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let key = Self::key(program, args);
        self.invocations.lock().unwrap().push(key.clone());

        let response = {
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) if queue.len() == 1 => queue[0].clone(),
                _ => None,
            }
        };

        response.ok_or_else(|| EnvError::ToolNotFound {
            tool: program.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_consumed_in_order() {
        let runner = ScriptedRunner::new();
        runner.script(
            "python --version",
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "boom".into(),
            },
        );
        runner.script("python --version", CommandOutput::ok("Python 3.11.4"));

        let first = runner.run("python", &["--version"]).await.unwrap();
        assert!(!first.success());
        let second = runner.run("python", &["--version"]).await.unwrap();
        assert!(second.success());
        // Last response repeats.
        let third = runner.run("python", &["--version"]).await.unwrap();
        assert!(third.success());
        assert_eq!(runner.count("python --version"), 3);
    }

    #[tokio::test]
    async fn test_missing_then_present_sequence() {
        let runner = ScriptedRunner::new();
        runner.script_missing("maturin --version");
        runner.script("maturin --version", CommandOutput::ok("maturin 1.2.3"));

        assert!(matches!(
            runner.run("maturin", &["--version"]).await,
            Err(EnvError::ToolNotFound { .. })
        ));
        assert!(runner.run("maturin", &["--version"]).await.unwrap().success());
    }

    #[tokio::test]
    async fn test_unscripted_command_is_tool_not_found() {
        let runner = ScriptedRunner::new();
        let err = runner.run("poetry", &["--version"]).await.unwrap_err();
        assert!(matches!(err, EnvError::ToolNotFound { .. }));
        assert_eq!(runner.invocations(), vec!["poetry --version".to_string()]);
    }
}
