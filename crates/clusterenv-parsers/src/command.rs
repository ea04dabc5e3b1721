//! Command execution utilities for conda and scheduler tools.
//!
//! Every external tool is driven through an [`Invocation`] with structured
//! arguments; nothing is ever passed through a shell string. A
//! [`CommandRunner`] executes invocations and hands back stdout, stderr and
//! the exit code as data.

use crate::shell::quote;
use nix::sys::signal::Signal as NixSignal;
use nix::unistd::Pid;
use std::fmt;
use std::future::Future;
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{command} not found on PATH")]
    NotFound { command: String },
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

impl CommandError {
    /// Name of the program that failed.
    pub fn command(&self) -> &str {
        match self {
            Self::NotFound { command }
            | Self::Execution { command, .. }
            | Self::Failed { command, .. } => command,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn spawn(program: &str, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                command: program.to_string(),
            }
        } else {
            Self::Execution {
                command: program.to_string(),
                error: error.to_string(),
            }
        }
    }
}

/// A single external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Basename of the program, as tools print it in their own diagnostics
    /// (`srun: error: ...`).
    pub fn program_name(&self) -> &str {
        self.program.rsplit('/').next().unwrap_or(&self.program)
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; None when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Diagnostic text for error reports: stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    /// Return stdout, turning a non-zero exit into [`CommandError::Failed`].
    pub fn into_stdout(self, command: &str) -> Result<String, CommandError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(CommandError::Failed {
                command: command.to_string(),
                stderr: self.diagnostic(),
            })
        }
    }
}

/// Exit of a command that ran attached to the caller's terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionExit {
    pub status: Option<i32>,
    /// Lines the tool itself wrote to stderr, prefixed with its own name.
    pub diagnostic: String,
}

/// Executes external invocations.
pub trait CommandRunner {
    /// Run to completion, capturing stdout and stderr.
    fn output(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>>;

    /// Run with the caller's stdin and stdout, blocking until the process exits.
    fn attached(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<SessionExit, CommandError>>;
}

impl<R: CommandRunner> CommandRunner for &R {
    fn output(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> {
        (**self).output(invocation)
    }

    fn attached(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<SessionExit, CommandError>> {
        (**self).attached(invocation)
    }
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn output(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %invocation, "running");
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CommandError::spawn(invocation.program(), e))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn attached(&self, invocation: &Invocation) -> Result<SessionExit, CommandError> {
        tracing::debug!(command = %invocation, "running attached");
        let mut child = invocation
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::spawn(invocation.program(), e))?;

        let prefix = format!("{}:", invocation.program_name());
        let relay = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(relay_stderr(stderr, prefix)));

        // Signals sent to our pid alone would otherwise leave the session
        // running without us.
        let mut signals = match Forwarded::listen() {
            Ok(signals) => Some(signals),
            Err(e) => {
                tracing::warn!("cannot listen for signals: {}", e);
                None
            }
        };

        let status = loop {
            let Some(listening) = signals.as_mut() else {
                break child.wait().await;
            };
            tokio::select! {
                status = child.wait() => break status,
                signal = listening.recv() => {
                    tracing::warn!(
                        "{} received, passing it to {}",
                        signal,
                        invocation.program_name()
                    );
                    if let Some(pid) = child.id() {
                        forward_signal(pid, signal);
                    }
                }
            }
        }
        .map_err(|e| CommandError::Execution {
            command: invocation.program().to_string(),
            error: e.to_string(),
        })?;

        let diagnostic = match relay {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(SessionExit {
            status: status.code(),
            diagnostic,
        })
    }
}

/// Signals an attached session must see even when only we received them.
struct Forwarded {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Forwarded {
    fn listen() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> NixSignal {
        tokio::select! {
            _ = self.interrupt.recv() => NixSignal::SIGINT,
            _ = self.terminate.recv() => NixSignal::SIGTERM,
            _ = self.hangup.recv() => NixSignal::SIGHUP,
        }
    }
}

fn forward_signal(pid: u32, signal: NixSignal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = nix::sys::signal::kill(Pid::from_raw(raw), signal) {
        tracing::debug!("could not forward {} to {}: {}", signal, pid, e);
    }
}

/// Copy the child's stderr through to ours, keeping the tool's own lines.
async fn relay_stderr(stderr: ChildStderr, prefix: String) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut sink = tokio::io::stderr();
    let mut captured = Vec::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let _ = sink.write_all(line.as_bytes()).await;
        let _ = sink.write_all(b"\n").await;
        if line.starts_with(&prefix) {
            captured.push(line);
        }
    }
    let _ = sink.flush().await;

    captured.join("\n")
}

/// Execute an invocation and return stdout as a string.
///
/// Convenience wrapper for probes where a non-zero exit is simply an error.
pub async fn run_command<R: CommandRunner>(
    runner: &R,
    invocation: &Invocation,
) -> Result<String, CommandError> {
    runner
        .output(invocation)
        .await?
        .into_stdout(invocation.program())
}
