//! Step kinds and parsing
//!
//! This module handles parsing the "uses" field of a declarative step into a
//! [`StepKind`]. Steps use the `category/action` format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kinds of steps a declarative stage can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// shell/exec - Run a command through `sh -c`
    ShellExec,
    /// log/echo - Capture a message in the stage output
    Echo,
    /// env/set - Set environment variables
    SetEnv,
    /// artifact/archive - Register files matching a glob as an artifact handle
    ArchiveArtifacts,
    /// status/fail - Fail the stage
    Fail,
    /// status/unstable - Mark the stage unstable and keep going
    Unstable,
    /// wait/ms - Sleep for a number of milliseconds
    WaitMs,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::ShellExec,
        StepKind::Echo,
        StepKind::SetEnv,
        StepKind::ArchiveArtifacts,
        StepKind::Fail,
        StepKind::Unstable,
        StepKind::WaitMs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ShellExec => "shell/exec",
            StepKind::Echo => "log/echo",
            StepKind::SetEnv => "env/set",
            StepKind::ArchiveArtifacts => "artifact/archive",
            StepKind::Fail => "status/fail",
            StepKind::Unstable => "status/unstable",
            StepKind::WaitMs => "wait/ms",
        }
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(uses: &str) -> Result<Self, Self::Err> {
        let uses = uses.trim();
        if uses.split('/').count() != 2 {
            return Err(format!(
                "Invalid step format '{}'. Expected 'category/action'",
                uses
            ));
        }

        StepKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == uses)
            .ok_or_else(|| format!("Unknown step: {}", uses))
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failing external command does to its stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the stage
    #[default]
    Fail,
    /// Mark the stage unstable and continue with the next step
    Unstable,
    /// Log the failure and continue
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "fail" => Ok(FailurePolicy::Fail),
            "unstable" => Ok(FailurePolicy::Unstable),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!(
                "Unknown on_failure policy '{}'. Expected fail, unstable or continue",
                other
            )),
        }
    }
}
