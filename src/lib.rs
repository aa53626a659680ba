//! # Pipeline Runner
//!
//! A staged CI pipeline engine: ordered stages over one shared environment,
//! gating predicates, post hooks keyed by outcome, a wall-clock deadline per
//! run, and fail-fast semantics.
//!
//! ## Features
//!
//! - **Programmatic stages** - Stages as async trait objects or closures
//! - **Declarative YAML pipelines** - `shell/exec`, `artifact/archive`, `env/set`, ...
//! - **Gates** - Branch globs, `${{ }}` expressions, or arbitrary predicates
//! - **Deadline and abort** - One timeout per run; in-flight work is cancelled
//! - **Reports** - JSON, JUnit XML and webhook sinks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipeline_runner::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new("orders")
//!         .stage(Stage::from_fn("Build", |ctx| {
//!             ctx.env_mut().set("IMAGE_TAG", "orders:1");
//!             Ok(ActionStatus::Success)
//!         }))
//!         .stage(
//!             Stage::from_fn("Deploy", |ctx| {
//!                 ctx.log(format!("deploying {}", ctx.env().get("IMAGE_TAG").unwrap_or("?")));
//!                 Ok(ActionStatus::Success)
//!             })
//!             .when(Gate::branch("main")),
//!         );
//!
//!     let runner = PipelineRunner::new(pipeline, RunnerOptions::default());
//!     let run = runner.execute(Trigger::new("main", "abc123")).await?;
//!
//!     println!("Run #{} finished: {}", run.number, run.state);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod pipeline;
pub mod report;

// Re-export main types
pub use engine::{
    execute, CommandRunner, CommandSpec, CompileError, Gate, Outcome, Pipeline, PipelineRunner,
    Run, RunState, RunnerError, RunnerOptions, ShellCommandRunner, SkipReason, Stage,
    StageAction, StageContext, StageError, StageOutcome,
};
pub use pipeline::{
    Environment, LoadError, PipelineDefinition, PipelineLoader, StepKind, Trigger,
};
pub use report::{JsonReportSink, JunitReportSink, ReportError, ReportSink, WebhookReportSink};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{
        action_fn, ActionStatus, CommandRunner, CommandSpec, Gate, Outcome, Pipeline,
        PipelineRunner, PostCondition, Run, RunState, RunnerOptions, Stage, StageAction,
        StageContext, StageError, StageOutcome,
    };
    pub use crate::pipeline::{Environment, PipelineDefinition, PipelineLoader, Trigger};
    pub use crate::report::{JsonReportSink, JunitReportSink, ReportSink, WebhookReportSink};
}
