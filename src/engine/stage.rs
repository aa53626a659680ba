//! Stage building blocks
//!
//! A [`Stage`] pairs a [`StageAction`] with a [`Gate`] and [`PostHooks`].
//! Stages are built once and shared; the mutable state of a run lives in the
//! [`StageContext`] handed to each action.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::Instant as TokioInstant;

use super::actions::shell::{CommandOutput, CommandRunner, CommandSpec};
use super::cancellation::CancellationToken;
use super::error::{GateError, StageError};
use super::outcome::PostCondition;
use super::result::CommandRecord;
use crate::pipeline::definition::EnvironmentBlock;
use crate::pipeline::environment::BRANCH_NAME;
use crate::pipeline::expressions::{evaluate_condition, interpolate};
use crate::pipeline::Environment;

/// Successful results of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Unstable,
}

/// Work performed by a stage or a post hook
#[async_trait]
pub trait StageAction: Send + Sync {
    async fn run(&self, ctx: &mut StageContext) -> Result<ActionStatus, StageError>;
}

/// Adapter for synchronous closures
struct FnAction<F>(F);

#[async_trait]
impl<F> StageAction for FnAction<F>
where
    F: Fn(&mut StageContext) -> Result<ActionStatus, StageError> + Send + Sync,
{
    async fn run(&self, ctx: &mut StageContext) -> Result<ActionStatus, StageError> {
        (self.0)(ctx)
    }
}

/// Wrap a synchronous closure as a [`StageAction`]
pub fn action_fn<F>(f: F) -> Arc<dyn StageAction>
where
    F: Fn(&mut StageContext) -> Result<ActionStatus, StageError> + Send + Sync + 'static,
{
    Arc::new(FnAction(f))
}

/// Everything an action may touch while it runs
///
/// The context owns the run environment for the duration of the call; the
/// runner takes it back afterwards, including when the action is cancelled.
pub struct StageContext {
    stage: String,
    env: Environment,
    commands: Arc<dyn CommandRunner>,
    cancellation: CancellationToken,
    deadline: Option<TokioInstant>,
    workspace: PathBuf,
    pub(crate) output: Vec<String>,
    pub(crate) records: Vec<CommandRecord>,
}

impl StageContext {
    pub fn new(
        stage: impl Into<String>,
        env: Environment,
        commands: Arc<dyn CommandRunner>,
        cancellation: CancellationToken,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stage: stage.into(),
            env,
            commands,
            cancellation,
            deadline: None,
            workspace: workspace.into(),
            output: Vec::new(),
            records: Vec::new(),
        }
    }

    pub(crate) fn with_deadline(mut self, deadline: TokioInstant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Time left before the run deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(TokioInstant::now()))
    }

    /// Capture a line of output
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(stage = %self.stage, "{}", line);
        self.output.push(line);
    }

    /// Run an external command and record it; the caller decides what a
    /// non-zero exit means
    pub async fn run_command(&mut self, spec: CommandSpec) -> Result<CommandOutput, StageError> {
        let spec = match spec.working_dir {
            Some(_) => spec,
            None => spec.in_dir(self.workspace.clone()),
        };

        let started = Instant::now();
        let output = self.commands.run(&spec, &self.env).await?;

        self.records.push(CommandRecord {
            command: spec.command.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout.trim_end().to_string(),
            stderr: output.stderr.trim_end().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            tolerated: false,
        });

        Ok(output)
    }

    /// Run a command and fail the stage on a non-zero exit
    pub async fn run_checked(&mut self, spec: CommandSpec) -> Result<CommandOutput, StageError> {
        let command = spec.command.clone();
        let output = self.run_command(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(StageError::CommandFailed {
                command,
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    /// Mark the most recent command as a tolerated failure
    pub(crate) fn tolerate_last_command(&mut self) {
        if let Some(record) = self.records.last_mut() {
            record.tolerated = true;
        }
    }

    /// Interpolate and set each entry of an environment block, in order
    pub fn apply_environment(&mut self, block: &EnvironmentBlock) -> Result<(), StageError> {
        for (key, template) in block.iter() {
            let value = interpolate(template, &self.env)?;
            self.env.set(key, value);
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Environment, Vec<String>, Vec<CommandRecord>) {
        (self.env, self.output, self.records)
    }
}

pub type GatePredicate = dyn Fn(&Environment) -> Result<bool, GateError> + Send + Sync;

/// Predicate deciding whether a stage runs
///
/// Gates are evaluated against the environment as it stands immediately
/// before their stage, never cached.
#[derive(Clone, Default)]
pub enum Gate {
    #[default]
    Always,
    /// Glob pattern matched against `BRANCH_NAME`
    Branch(String),
    /// Condition expression, see `pipeline::expressions`
    Expression(String),
    Predicate(Arc<GatePredicate>),
}

impl Gate {
    pub fn branch(pattern: impl Into<String>) -> Self {
        Gate::Branch(pattern.into())
    }

    pub fn expression(condition: impl Into<String>) -> Self {
        Gate::Expression(condition.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Environment) -> Result<bool, GateError> + Send + Sync + 'static,
    {
        Gate::Predicate(Arc::new(f))
    }

    pub fn evaluate(&self, env: &Environment) -> Result<bool, GateError> {
        match self {
            Gate::Always => Ok(true),
            Gate::Branch(pattern) => {
                let branch = env
                    .branch()
                    .ok_or_else(|| GateError::MissingKey(BRANCH_NAME.to_string()))?;
                let matcher = glob::Pattern::new(pattern).map_err(|e| GateError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(matcher.matches(branch))
            }
            Gate::Expression(condition) => Ok(evaluate_condition(condition, env)?),
            Gate::Predicate(f) => f(env),
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Always => write!(f, "Always"),
            Gate::Branch(pattern) => write!(f, "Branch({:?})", pattern),
            Gate::Expression(condition) => write!(f, "Expression({:?})", condition),
            Gate::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Always => write!(f, "always"),
            Gate::Branch(pattern) => write!(f, "branch {}", pattern),
            Gate::Expression(condition) => write!(f, "{}", condition),
            Gate::Predicate(_) => write!(f, "<predicate>"),
        }
    }
}

/// Hooks run after a stage or a run, keyed by outcome
#[derive(Clone, Default)]
pub struct PostHooks {
    hooks: Vec<(PostCondition, Arc<dyn StageAction>)>,
}

impl PostHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, condition: PostCondition, hook: Arc<dyn StageAction>) {
        self.hooks.push((condition, hook));
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hooks registered under exactly `condition`, in registration order
    pub fn for_condition(
        &self,
        condition: PostCondition,
    ) -> impl Iterator<Item = &Arc<dyn StageAction>> {
        self.hooks
            .iter()
            .filter(move |(c, _)| *c == condition)
            .map(|(_, hook)| hook)
    }
}

impl fmt::Debug for PostHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|(c, _)| c))
            .finish()
    }
}

/// A named unit of pipeline work
#[derive(Clone)]
pub struct Stage {
    name: String,
    action: Arc<dyn StageAction>,
    gate: Gate,
    post: PostHooks,
}

impl Stage {
    pub fn new(name: impl Into<String>, action: Arc<dyn StageAction>) -> Self {
        Self {
            name: name.into(),
            action,
            gate: Gate::Always,
            post: PostHooks::new(),
        }
    }

    /// Build a stage from a synchronous closure
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StageContext) -> Result<ActionStatus, StageError> + Send + Sync + 'static,
    {
        Self::new(name, action_fn(f))
    }

    pub fn when(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    pub fn post(mut self, condition: PostCondition, hook: Arc<dyn StageAction>) -> Self {
        self.post.add(condition, hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &Arc<dyn StageAction> {
        &self.action
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn hooks(&self) -> &PostHooks {
        &self.post
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("gate", &self.gate)
            .field("post", &self.post)
            .finish()
    }
}

/// An executable pipeline: ordered stages plus run-level hooks
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub name: String,
    pub stages: Vec<Stage>,
    pub post: PostHooks,
    /// Interpolated in order when a run starts
    pub environment: EnvironmentBlock,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn post(mut self, condition: PostCondition, hook: Arc<dyn StageAction>) -> Self {
        self.post.add(condition, hook);
        self
    }

    pub fn env(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.environment.0.push((key.into(), template.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::actions::shell::ShellCommandRunner;

    fn env_on(branch: &str) -> Environment {
        let mut env = Environment::new();
        env.set(BRANCH_NAME, branch);
        env
    }

    #[test]
    fn test_branch_gate() {
        let gate = Gate::branch("main");
        assert!(gate.evaluate(&env_on("main")).unwrap());
        assert!(!gate.evaluate(&env_on("dev")).unwrap());
    }

    #[test]
    fn test_branch_gate_glob() {
        let gate = Gate::branch("release/*");
        assert!(gate.evaluate(&env_on("release/1.2")).unwrap());
        assert!(!gate.evaluate(&env_on("feature/x")).unwrap());
    }

    #[test]
    fn test_branch_gate_missing_branch() {
        let err = Gate::branch("main").evaluate(&Environment::new()).unwrap_err();
        assert_eq!(err, GateError::MissingKey(BRANCH_NAME.to_string()));
    }

    #[test]
    fn test_branch_gate_invalid_pattern() {
        let err = Gate::branch("release/[").evaluate(&env_on("main")).unwrap_err();
        assert!(matches!(err, GateError::InvalidPattern { .. }));
    }

    #[test]
    fn test_expression_gate() {
        let gate = Gate::expression("${{ env.BRANCH_NAME }} == 'main'");
        assert!(gate.evaluate(&env_on("main")).unwrap());
        assert!(Gate::expression("${{ env.NOPE }}")
            .evaluate(&env_on("main"))
            .is_err());
    }

    #[test]
    fn test_predicate_gate() {
        let gate = Gate::predicate(|env| Ok(env.contains("READY")));
        let mut env = env_on("main");
        assert!(!gate.evaluate(&env).unwrap());
        env.set("READY", "1");
        assert!(gate.evaluate(&env).unwrap());
    }

    #[test]
    fn test_post_hooks_by_condition() {
        let hook = action_fn(|_| Ok(ActionStatus::Success));
        let mut hooks = PostHooks::new();
        hooks.add(PostCondition::Failure, hook.clone());
        hooks.add(PostCondition::Always, hook.clone());
        hooks.add(PostCondition::Failure, hook);

        assert_eq!(hooks.for_condition(PostCondition::Failure).count(), 2);
        assert_eq!(hooks.for_condition(PostCondition::Always).count(), 1);
        assert_eq!(hooks.for_condition(PostCondition::Success).count(), 0);
    }

    #[tokio::test]
    async fn test_context_records_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = StageContext::new(
            "Build",
            Environment::new(),
            Arc::new(ShellCommandRunner::new()),
            CancellationToken::new(),
            dir.path(),
        );

        ctx.run_command(CommandSpec::new("echo built")).await.unwrap();
        let err = ctx.run_checked(CommandSpec::new("exit 2")).await.unwrap_err();
        assert!(matches!(err, StageError::CommandFailed { exit_code: 2, .. }));

        let (_, _, records) = ctx.into_parts();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stdout, "built");
        assert_eq!(records[1].exit_code, 2);
    }

    #[test]
    fn test_apply_environment_in_order() {
        let mut ctx = StageContext::new(
            "Setup",
            env_on("main"),
            Arc::new(ShellCommandRunner::new()),
            CancellationToken::new(),
            ".",
        );
        let block = EnvironmentBlock(vec![
            ("APP".to_string(), "orders".to_string()),
            (
                "IMAGE".to_string(),
                "${{ env.APP }}:${{ env.BRANCH_NAME }}".to_string(),
            ),
        ]);

        ctx.apply_environment(&block).unwrap();
        assert_eq!(ctx.env().get("IMAGE"), Some("orders:main"));
        assert_eq!(ctx.remaining(), None);
    }
}
