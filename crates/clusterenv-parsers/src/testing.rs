//! Scripted command runner for tests.

use crate::command::{CommandError, CommandOutput, CommandRunner, Invocation, SessionExit};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Response {
    Output(CommandOutput),
    Error(String),
}

/// A [`CommandRunner`] that answers from a script instead of spawning
/// processes, and records every invocation it sees.
///
/// Responses are matched by substring against `"<program name> <args...>"`.
/// When several responses match, they are handed out in registration order
/// and the last one repeats. Unmatched invocations fail with
/// [`CommandError::NotFound`].
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, Response)>,
    used: Mutex<Vec<bool>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer invocations containing `pattern` with the given output.
    pub fn on(mut self, pattern: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.push((
            pattern.to_string(),
            Response::Output(CommandOutput {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        ));
        self.used.get_mut().unwrap().push(false);
        self
    }

    /// Fail invocations containing `pattern` with an execution error.
    pub fn fail(mut self, pattern: &str, error: &str) -> Self {
        self.responses
            .push((pattern.to_string(), Response::Error(error.to_string())));
        self.used.get_mut().unwrap().push(false);
        self
    }

    /// Command lines seen so far, as `"<program name> <args...>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(line)
            .collect()
    }

    /// Full invocations seen so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, pattern: &str) -> bool {
        self.calls().iter().any(|c| c.contains(pattern))
    }

    fn respond(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let line = line(invocation);

        let matching: Vec<usize> = self
            .responses
            .iter()
            .enumerate()
            .filter(|(_, (pattern, _))| line.contains(pattern.as_str()))
            .map(|(i, _)| i)
            .collect();

        let mut used = self.used.lock().unwrap();
        let Some(idx) = matching
            .iter()
            .copied()
            .find(|&i| !used[i])
            .or(matching.last().copied())
        else {
            return Err(CommandError::NotFound {
                command: invocation.program_name().to_string(),
            });
        };
        used[idx] = true;

        match &self.responses[idx].1 {
            Response::Output(output) => Ok(output.clone()),
            Response::Error(error) => Err(CommandError::Execution {
                command: invocation.program_name().to_string(),
                error: error.clone(),
            }),
        }
    }
}

fn line(invocation: &Invocation) -> String {
    let mut words = vec![invocation.program_name().to_string()];
    words.extend(invocation.get_args().iter().cloned());
    words.join(" ")
}

impl CommandRunner for ScriptedRunner {
    async fn output(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        self.respond(invocation)
    }

    async fn attached(&self, invocation: &Invocation) -> Result<SessionExit, CommandError> {
        let output = self.respond(invocation)?;
        Ok(SessionExit {
            status: output.status,
            diagnostic: output.stderr.trim().to_string(),
        })
    }
}
