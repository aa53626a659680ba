//! Outcome classification for stages and runs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result classification of a stage or a whole run
///
/// Variants are ordered by severity, so the aggregate of several outcomes is
/// their maximum: `Aborted > Failure > Unstable > Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Unstable,
    Failure,
    Aborted,
}

impl Outcome {
    /// Most severe of the given outcomes, `Success` when empty
    pub fn aggregate<I>(outcomes: I) -> Outcome
    where
        I: IntoIterator<Item = Outcome>,
    {
        outcomes.into_iter().max().unwrap_or(Outcome::Success)
    }

    /// Returns true if no later stage may run after this outcome
    pub fn halts(&self) -> bool {
        matches!(self, Outcome::Failure | Outcome::Aborted)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Unstable => write!(f, "UNSTABLE"),
            Outcome::Failure => write!(f, "FAILURE"),
            Outcome::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Why a stage's action did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The stage's gate evaluated to false
    GateClosed,
    /// An earlier stage failed
    PriorFailure,
    /// The run was aborted by its deadline
    PriorAbort,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::GateClosed => write!(f, "gate closed"),
            SkipReason::PriorFailure => write!(f, "earlier stage failed"),
            SkipReason::PriorAbort => write!(f, "run aborted"),
        }
    }
}

/// Per-stage outcome, including the reporting-only `Skipped` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum StageOutcome {
    Success,
    Unstable,
    Failure,
    Aborted,
    Skipped(SkipReason),
}

impl StageOutcome {
    /// Outcome used for aggregation; skipped stages count as success
    pub fn outcome(&self) -> Outcome {
        match self {
            StageOutcome::Success | StageOutcome::Skipped(_) => Outcome::Success,
            StageOutcome::Unstable => Outcome::Unstable,
            StageOutcome::Failure => Outcome::Failure,
            StageOutcome::Aborted => Outcome::Aborted,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageOutcome::Skipped(_))
    }
}

impl From<Outcome> for StageOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => StageOutcome::Success,
            Outcome::Unstable => StageOutcome::Unstable,
            Outcome::Failure => StageOutcome::Failure,
            Outcome::Aborted => StageOutcome::Aborted,
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Skipped(reason) => write!(f, "SKIPPED ({})", reason),
            other => write!(f, "{}", other.outcome()),
        }
    }
}

/// Condition a post hook is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostCondition {
    Success,
    Unstable,
    Failure,
    Aborted,
    Always,
}

impl From<Outcome> for PostCondition {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => PostCondition::Success,
            Outcome::Unstable => PostCondition::Unstable,
            Outcome::Failure => PostCondition::Failure,
            Outcome::Aborted => PostCondition::Aborted,
        }
    }
}

/// Lifecycle state of a run
///
/// `Pending -> Running -> {Succeeded, Failed, Unstable, Aborted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Unstable,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }

    /// Process exit code for a terminal state
    pub fn exit_code(&self) -> u8 {
        match self {
            RunState::Succeeded => 0,
            RunState::Failed => 1,
            RunState::Unstable => 3,
            RunState::Aborted => 4,
            RunState::Pending | RunState::Running => 2,
        }
    }
}

impl From<Outcome> for RunState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => RunState::Succeeded,
            Outcome::Unstable => RunState::Unstable,
            Outcome::Failure => RunState::Failed,
            Outcome::Aborted => RunState::Aborted,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Pending => "PENDING",
            RunState::Running => "RUNNING",
            RunState::Succeeded => "SUCCEEDED",
            RunState::Unstable => "UNSTABLE",
            RunState::Failed => "FAILED",
            RunState::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}
