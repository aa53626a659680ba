//! Pipeline execution engine module
//!
//! This module contains:
//! - `runner` - The pipeline runner: ordering, gates, deadline, hooks
//! - `stage` - Stage, Gate, PostHooks and the StageAction trait
//! - `compile` - Turns a PipelineDefinition into an executable Pipeline
//! - `outcome` - Outcome, StageOutcome and RunState classification
//! - `error` - Runner, stage, gate and compile error types
//! - `result` - Run, stage, hook and command records
//! - `history` - Bounded history of completed runs
//! - `cancellation` - Cooperative cancellation signalled by the deadline
//! - `actions` - Built-in actions (shell commands, declarative steps, artifacts)

pub mod actions;
pub mod cancellation;
pub mod compile;
pub mod error;
pub mod history;
pub mod outcome;
pub mod result;
pub mod runner;
pub mod stage;

pub use actions::{CommandOutput, CommandRunner, CommandSpec, ShellCommandRunner, StepsAction};
pub use cancellation::CancellationToken;
pub use compile::compile;
pub use error::{CompileError, GateError, RunnerError, StageError};
pub use history::RunHistory;
pub use outcome::{Outcome, PostCondition, RunState, SkipReason, StageOutcome};
pub use result::{CommandRecord, HookRecord, Run, StageRecord};
pub use runner::{execute, PipelineRunner, RunnerOptions};
pub use stage::{
    action_fn, ActionStatus, Gate, GatePredicate, Pipeline, PostHooks, Stage, StageAction,
    StageContext,
};
