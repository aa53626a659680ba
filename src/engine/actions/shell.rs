//! External command execution
//!
//! Every external tool a stage invokes (build tool, container engine,
//! scanner, checksum utilities) goes through a [`CommandRunner`]. A call
//! yields exit code, stdout and stderr; whether a non-zero exit fails the
//! stage is decided by the call site, not here.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::pipeline::Environment;

/// A command line to run through `sh -c`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Exit code and captured streams of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Facility used by stages to run external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command with the run environment exported to it
    async fn run(&self, spec: &CommandSpec, env: &Environment) -> std::io::Result<CommandOutput>;
}

/// Runs commands on the host through `sh -c`
///
/// Children are killed when the returned future is dropped, so an action
/// cancelled by the run deadline does not leave its process behind.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, spec: &CommandSpec, env: &Environment) -> std::io::Result<CommandOutput> {
        debug!(command = %spec.command, "Executing shell command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&spec.command);
        cmd.envs(env.vars());

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = cmd.output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
