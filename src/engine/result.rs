//! Execution result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::{Outcome, PostCondition, RunState, StageOutcome};
use crate::pipeline::{Environment, Trigger};

/// One external command invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Non-zero exit that the call site chose to swallow
    #[serde(default)]
    pub tolerated: bool,
}

/// Result of one post hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRecord {
    pub condition: PostCondition,
    pub succeeded: bool,
    pub error: Option<String>,
    pub output: Vec<String>,
    pub commands: Vec<CommandRecord>,
}

/// Result of a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub outcome: StageOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Captured log lines
    pub output: Vec<String>,
    pub commands: Vec<CommandRecord>,
    pub error: Option<String>,
    pub hooks: Vec<HookRecord>,
}

impl StageRecord {
    pub(crate) fn new(name: &str, outcome: StageOutcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            started_at: None,
            duration_ms: 0,
            output: Vec::new(),
            commands: Vec::new(),
            error: None,
            hooks: Vec::new(),
        }
    }

    /// Captured output and command output joined for reports
    pub fn captured_text(&self) -> String {
        let mut lines = self.output.clone();
        for command in &self.commands {
            lines.push(format!("$ {}", command.command));
            if !command.stdout.is_empty() {
                lines.push(command.stdout.clone());
            }
            if !command.stderr.is_empty() {
                lines.push(command.stderr.clone());
            }
        }
        lines.join("\n")
    }
}

/// One execution of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub pipeline: String,
    pub number: u64,
    pub trigger: Trigger,
    pub state: RunState,
    /// Aggregate outcome, set when the run reaches a terminal state
    pub outcome: Option<Outcome>,
    /// Failure raised before the first stage (environment setup)
    pub setup_error: Option<String>,
    pub stages: Vec<StageRecord>,
    /// Pipeline-level post hooks
    pub post: Vec<HookRecord>,
    /// Environment as of the end of the run
    pub environment: Environment,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
}

impl Run {
    pub(crate) fn new(pipeline: &str, number: u64, trigger: Trigger, timeout_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline: pipeline.to_string(),
            number,
            trigger,
            state: RunState::Pending,
            outcome: None,
            setup_error: None,
            stages: Vec::new(),
            post: Vec::new(),
            environment: Environment::new(),
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            deadline: None,
            timeout_ms,
        }
    }

    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.state, RunState::Pending, "run started twice");
        let now = Utc::now();
        self.state = RunState::Running;
        self.started_at = Some(now);
        self.deadline = i64::try_from(self.timeout_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|timeout| now.checked_add_signed(timeout));
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        debug_assert_eq!(self.state, RunState::Running, "run finished outside Running");
        self.outcome = Some(outcome);
        self.state = RunState::from(outcome);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_outcomes(&self) -> Vec<StageOutcome> {
        self.stages.iter().map(|s| s.outcome).collect()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}
