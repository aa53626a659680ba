//! Pipeline runner
//!
//! Executes the stages of a [`Pipeline`] strictly in order against one
//! mutable [`Environment`], under a single wall-clock deadline per run.
//!
//! - A closed gate skips its stage; nothing else changes.
//! - `Failure` halts the run: later stages are recorded as skipped.
//! - The deadline firing aborts the running stage and halts the run.
//! - `Unstable` is recorded and execution continues.
//! - Post hooks run after every executed stage and after the run, outside
//!   the deadline; their failures are logged and never change an outcome.
//!
//! Unless `allow_concurrent` is set, triggers of one runner are serialized:
//! a run waits in `Pending` until every earlier run has finished.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, error, info, instrument, warn};

/// Deadline used when the timeout overflows the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

use super::actions::shell::{CommandRunner, ShellCommandRunner};
use super::cancellation::CancellationToken;
use super::error::{RunnerError, StageError};
use super::history::RunHistory;
use super::outcome::{Outcome, PostCondition, SkipReason, StageOutcome};
use super::result::{HookRecord, Run, StageRecord};
use super::stage::{ActionStatus, Pipeline, PostHooks, Stage, StageAction, StageContext};
use crate::pipeline::{Environment, PipelineDefinition, PipelineOptions, Trigger};
use crate::report::ReportSink;

/// Run policy of a [`PipelineRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Wall-clock limit for one run
    pub timeout: Duration,
    /// Completed runs kept in history
    pub max_history_runs: usize,
    /// Let runs overlap instead of queueing them
    pub allow_concurrent: bool,
    /// Working directory for commands and artifact patterns
    pub workspace: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&PipelineOptions::default())
    }
}

impl From<&PipelineOptions> for RunnerOptions {
    fn from(options: &PipelineOptions) -> Self {
        Self {
            timeout: Duration::from_secs(options.timeout_seconds),
            max_history_runs: options.max_history_runs,
            allow_concurrent: options.allow_concurrent,
            workspace: PathBuf::from("."),
        }
    }
}

/// Executes runs of one pipeline
pub struct PipelineRunner {
    pipeline: Pipeline,
    options: RunnerOptions,
    commands: Arc<dyn CommandRunner>,
    sinks: Vec<Arc<dyn ReportSink>>,
    /// Held for the whole run when runs are serialized; tokio's mutex
    /// grants waiters in FIFO order
    lock: Mutex<()>,
    queued: AtomicUsize,
    history: RwLock<RunHistory>,
    next_build: AtomicU64,
}

impl PipelineRunner {
    pub fn new(pipeline: Pipeline, options: RunnerOptions) -> Self {
        let history = RunHistory::new(options.max_history_runs);
        Self {
            pipeline,
            options,
            commands: Arc::new(ShellCommandRunner::new()),
            sinks: Vec::new(),
            lock: Mutex::new(()),
            queued: AtomicUsize::new(0),
            history: RwLock::new(history),
            next_build: AtomicU64::new(0),
        }
    }

    /// Compile a definition, taking run policy from its `options:` block
    pub fn from_definition(def: &PipelineDefinition) -> Result<Self, RunnerError> {
        let pipeline = Pipeline::from_definition(def)?;
        Ok(Self::new(pipeline, RunnerOptions::from(&def.options)))
    }

    /// Replace the facility used to run external commands
    pub fn with_command_runner(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.history = RwLock::new(RunHistory::new(options.max_history_runs));
        self.options = options;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Number of runs waiting for the active run to finish
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Completed runs, oldest first
    pub async fn history(&self) -> Vec<Run> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn last_run(&self) -> Option<Run> {
        self.history.read().await.last().cloned()
    }

    /// Trigger a run and wait for it to reach a terminal state
    #[instrument(skip(self, trigger), fields(pipeline = %self.pipeline.name, branch = %trigger.branch))]
    pub async fn execute(&self, trigger: Trigger) -> Result<Run, RunnerError> {
        if self.pipeline.stages.is_empty() {
            return Err(RunnerError::EmptyPipeline(self.pipeline.name.clone()));
        }

        let number = self.next_build.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout_ms = u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut run = Run::new(&self.pipeline.name, number, trigger, timeout_ms);

        let _guard = if self.options.allow_concurrent {
            None
        } else {
            let slot = QueueSlot::take(&self.queued);
            let guard = match self.lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!("Run #{} queued behind an active run", number);
                    self.lock.lock().await
                }
            };
            drop(slot);
            Some(guard)
        };

        run.start();
        let deadline = run_deadline(self.options.timeout);
        let cancellation = CancellationToken::new();

        info!(
            "Starting run #{} of '{}' ({} stages, timeout {:?})",
            number,
            self.pipeline.name,
            self.pipeline.stages.len(),
            self.options.timeout
        );

        let mut env = Environment::from_trigger(
            &run.trigger,
            &self.pipeline.name,
            number,
            &run.id,
            &self.options.workspace,
        );

        let mut halt = None;
        let mut setup_outcome = Outcome::Success;
        if let Err(e) = self.apply_pipeline_environment(&mut env) {
            error!("Pipeline environment setup failed: {}", e);
            run.setup_error = Some(e.to_string());
            setup_outcome = Outcome::Failure;
            halt = Some(SkipReason::PriorFailure);
        }

        for stage in &self.pipeline.stages {
            let record = match halt {
                Some(reason) => {
                    debug!("Skipping stage '{}': {}", stage.name(), reason);
                    StageRecord::new(stage.name(), StageOutcome::Skipped(reason))
                }
                None => {
                    let (record, returned) =
                        self.run_stage(stage, env, deadline, &cancellation).await;
                    env = returned;
                    record
                }
            };

            let outcome = record.outcome.outcome();
            if halt.is_none() && outcome.halts() {
                halt = Some(match outcome {
                    Outcome::Aborted => SkipReason::PriorAbort,
                    _ => SkipReason::PriorFailure,
                });
            }

            for sink in &self.sinks {
                sink.stage_completed(&run.id, &record).await;
            }
            run.stages.push(record);
        }

        let outcome = Outcome::aggregate(
            std::iter::once(setup_outcome).chain(run.stages.iter().map(|s| s.outcome.outcome())),
        );

        let (post, env) = run_hooks(
            &self.pipeline.post,
            outcome,
            &self.pipeline.name,
            env,
            &self.commands,
            &self.options.workspace,
        )
        .await;
        run.post = post;
        run.environment = env;
        run.finish(outcome);

        match outcome {
            Outcome::Success | Outcome::Unstable => {
                info!("Run #{} finished: {}", number, run.state)
            }
            Outcome::Failure | Outcome::Aborted => {
                error!("Run #{} finished: {}", number, run.state)
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.run_completed(&run).await {
                warn!("Report sink '{}' failed: {}", sink.name(), e);
            }
        }

        self.history.write().await.push(run.clone());
        Ok(run)
    }

    fn apply_pipeline_environment(&self, env: &mut Environment) -> Result<(), StageError> {
        for (key, template) in self.pipeline.environment.iter() {
            let value = crate::pipeline::interpolate(template, env)?;
            env.set(key, value);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(stage = %stage.name()))]
    async fn run_stage(
        &self,
        stage: &Stage,
        env: Environment,
        deadline: TokioInstant,
        cancellation: &CancellationToken,
    ) -> (StageRecord, Environment) {
        let mut record = StageRecord::new(stage.name(), StageOutcome::Success);

        if TokioInstant::now() >= deadline {
            cancellation.cancel("deadline exceeded");
            warn!("Deadline elapsed before stage '{}' started", stage.name());
            record.outcome = StageOutcome::Aborted;
            record.error = Some(StageError::TimeoutExceeded.to_string());
            let env = self.run_stage_hooks(stage, Outcome::Aborted, env, &mut record).await;
            return (record, env);
        }

        match stage.gate().evaluate(&env) {
            Ok(true) => {}
            Ok(false) => {
                info!("Skipping stage '{}' due to gate ({})", stage.name(), stage.gate());
                record.outcome = StageOutcome::Skipped(SkipReason::GateClosed);
                return (record, env);
            }
            Err(e) => {
                error!("Gate of stage '{}' failed: {}", stage.name(), e);
                record.outcome = StageOutcome::Failure;
                record.error = Some(StageError::Gate(e).to_string());
                let env = self.run_stage_hooks(stage, Outcome::Failure, env, &mut record).await;
                return (record, env);
            }
        }

        info!("Running stage: {}", stage.name());
        record.started_at = Some(Utc::now());
        let started = Instant::now();

        let mut ctx = StageContext::new(
            stage.name(),
            env,
            self.commands.clone(),
            cancellation.clone(),
            self.options.workspace.clone(),
        )
        .with_deadline(deadline);

        let result = {
            let action = AssertUnwindSafe(stage.action().run(&mut ctx)).catch_unwind();
            tokio::time::timeout_at(deadline, action).await
        };
        let past_deadline = TokioInstant::now() >= deadline;

        let (outcome, stage_error) = match result {
            Err(_) => {
                cancellation.cancel(format!("deadline exceeded in stage '{}'", stage.name()));
                (Outcome::Aborted, Some(StageError::TimeoutExceeded))
            }
            Ok(_) if past_deadline => {
                cancellation.cancel(format!("deadline exceeded in stage '{}'", stage.name()));
                (Outcome::Aborted, Some(StageError::TimeoutExceeded))
            }
            Ok(Ok(Ok(ActionStatus::Success))) => (Outcome::Success, None),
            Ok(Ok(Ok(ActionStatus::Unstable))) => (Outcome::Unstable, None),
            Ok(Ok(Err(e))) => (Outcome::Failure, Some(e)),
            Ok(Err(panic)) => (
                Outcome::Failure,
                Some(StageError::Panicked(panic_message(panic.as_ref()))),
            ),
        };

        let (env, output, commands) = ctx.into_parts();
        record.outcome = StageOutcome::from(outcome);
        record.output = output;
        record.commands = commands;
        record.duration_ms = started.elapsed().as_millis() as u64;

        match &stage_error {
            Some(e) if outcome == Outcome::Aborted => {
                warn!("Stage '{}' aborted: {}", stage.name(), e)
            }
            Some(e) => error!("Stage '{}' failed: {}", stage.name(), e),
            None => info!("Stage '{}' finished: {}", stage.name(), outcome),
        }
        record.error = stage_error.map(|e| e.to_string());

        let env = self.run_stage_hooks(stage, outcome, env, &mut record).await;
        (record, env)
    }

    async fn run_stage_hooks(
        &self,
        stage: &Stage,
        outcome: Outcome,
        env: Environment,
        record: &mut StageRecord,
    ) -> Environment {
        let (hooks, env) = run_hooks(
            stage.hooks(),
            outcome,
            stage.name(),
            env,
            &self.commands,
            &self.options.workspace,
        )
        .await;
        record.hooks = hooks;
        env
    }
}

/// Counts a run as queued until dropped, including when the waiting
/// `execute` future is dropped
struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn take(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::SeqCst);
        Self(queued)
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_deadline(timeout: Duration) -> TokioInstant {
    let now = TokioInstant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Run the hooks for `outcome`, then the `Always` hooks
async fn run_hooks(
    hooks: &PostHooks,
    outcome: Outcome,
    owner: &str,
    mut env: Environment,
    commands: &Arc<dyn CommandRunner>,
    workspace: &std::path::Path,
) -> (Vec<HookRecord>, Environment) {
    let mut records = Vec::new();

    for condition in [PostCondition::from(outcome), PostCondition::Always] {
        for hook in hooks.for_condition(condition) {
            debug!("Running {:?} hook for '{}'", condition, owner);
            let (record, returned) =
                run_hook(hook.as_ref(), condition, owner, env, commands, workspace).await;
            env = returned;
            records.push(record);
        }
    }

    (records, env)
}

async fn run_hook(
    hook: &dyn StageAction,
    condition: PostCondition,
    owner: &str,
    env: Environment,
    commands: &Arc<dyn CommandRunner>,
    workspace: &std::path::Path,
) -> (HookRecord, Environment) {
    let mut ctx = StageContext::new(
        owner,
        env,
        commands.clone(),
        CancellationToken::new(),
        workspace,
    );

    let result = AssertUnwindSafe(hook.run(&mut ctx)).catch_unwind().await;
    let error = match result {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(e),
        Err(panic) => Some(StageError::Panicked(panic_message(panic.as_ref()))),
    };

    if let Some(e) = &error {
        warn!("{:?} hook of '{}' failed: {}", condition, owner, e);
    }

    let (env, output, commands) = ctx.into_parts();
    let record = HookRecord {
        condition,
        succeeded: error.is_none(),
        error: error.map(|e| e.to_string()),
        output,
        commands,
    };
    (record, env)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `stages` once as an anonymous pipeline
pub async fn execute(
    stages: Vec<Stage>,
    options: RunnerOptions,
    trigger: Trigger,
) -> Result<Run, RunnerError> {
    let mut pipeline = Pipeline::new("pipeline");
    pipeline.stages = stages;
    PipelineRunner::new(pipeline, options).execute(trigger).await
}
