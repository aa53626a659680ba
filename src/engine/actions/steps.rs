//! Declarative step execution
//!
//! A stage defined in YAML runs its steps in order through [`StepsAction`].
//! The first failing step fails the stage; later steps do not run.
//!
//! ```yaml
//! steps:
//!   - uses: shell/exec
//!     with:
//!       command: "git rev-parse --short HEAD"
//!       capture: GIT_COMMIT
//!   - uses: shell/exec
//!     with:
//!       command: "docker image ls"
//!       on_failure: continue
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::artifacts::{archive, ArchiveRequest};
use super::shell::CommandSpec;
use crate::engine::error::StageError;
use crate::engine::stage::{ActionStatus, StageAction, StageContext};
use crate::pipeline::definition::{EnvironmentBlock, StepDefinition};
use crate::pipeline::expressions::interpolate_params;
use crate::pipeline::{FailurePolicy, StepKind};

/// A validated declarative step
#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub name: String,
    pub kind: StepKind,
    pub with: HashMap<String, serde_yaml::Value>,
}

impl CompiledStep {
    /// Parse `uses` and check required parameters
    pub fn compile(def: &StepDefinition) -> Result<Self, String> {
        let kind: StepKind = def.uses.parse()?;

        let required: &[&str] = match kind {
            StepKind::ShellExec => &["command"],
            StepKind::ArchiveArtifacts => &["pattern"],
            StepKind::WaitMs => &["duration"],
            _ => &[],
        };
        for key in required {
            if !def.with.contains_key(*key) {
                return Err(format!(
                    "step '{}' ({}) requires '{}' parameter",
                    def.display_name(),
                    kind,
                    key
                ));
            }
        }

        if let Some(serde_yaml::Value::String(policy)) = def.with.get("on_failure") {
            policy.parse::<FailurePolicy>()?;
        }

        Ok(Self {
            name: def.display_name().to_string(),
            kind,
            with: def.with.clone(),
        })
    }
}

/// Runs a list of declarative steps as one stage action
#[derive(Debug, Clone, Default)]
pub struct StepsAction {
    pub environment: EnvironmentBlock,
    pub steps: Vec<CompiledStep>,
}

impl StepsAction {
    pub fn new(environment: EnvironmentBlock, steps: Vec<CompiledStep>) -> Self {
        Self { environment, steps }
    }
}

#[async_trait]
impl StageAction for StepsAction {
    async fn run(&self, ctx: &mut StageContext) -> Result<ActionStatus, StageError> {
        ctx.apply_environment(&self.environment)?;

        let mut status = ActionStatus::Success;
        for step in &self.steps {
            if ctx.cancellation().is_cancelled() {
                return Err(StageError::TimeoutExceeded);
            }

            debug!(stage = %ctx.stage(), step = %step.name, "Executing step");
            if execute_step(step, ctx).await? == ActionStatus::Unstable {
                status = ActionStatus::Unstable;
            }
        }

        Ok(status)
    }
}

async fn execute_step(
    step: &CompiledStep,
    ctx: &mut StageContext,
) -> Result<ActionStatus, StageError> {
    let params = interpolate_params(&step.with, ctx.env())?;

    match step.kind {
        StepKind::ShellExec => execute_shell(step, &params, ctx).await,

        StepKind::Echo => {
            ctx.log(params.get("message").cloned().unwrap_or_default());
            Ok(ActionStatus::Success)
        }

        StepKind::SetEnv => {
            let mut keys: Vec<_> = params.keys().collect();
            keys.sort();
            for key in keys {
                ctx.env_mut().set(key.as_str(), params[key].as_str());
            }
            Ok(ActionStatus::Success)
        }

        StepKind::ArchiveArtifacts => {
            let request = ArchiveRequest {
                name: params
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| "artifacts".to_string()),
                pattern: required(&params, "pattern", step)?.to_string(),
                fingerprint: flag(&params, "fingerprint")?,
                allow_empty: flag(&params, "allow_empty")?,
            };
            let handle = archive(ctx.workspace(), &request).await?;
            ctx.log(format!(
                "Archived {} file(s) as '{}'",
                handle.paths.len(),
                handle.name
            ));
            ctx.env_mut().add_artifact(handle);
            Ok(ActionStatus::Success)
        }

        StepKind::Fail => {
            let message = params
                .get("message")
                .cloned()
                .unwrap_or_else(|| "Stage failed".to_string());
            Err(StageError::ActionFailed(message))
        }

        StepKind::Unstable => {
            let message = params
                .get("message")
                .cloned()
                .unwrap_or_else(|| "Stage marked unstable".to_string());
            ctx.log(message);
            Ok(ActionStatus::Unstable)
        }

        StepKind::WaitMs => {
            let raw = required(&params, "duration", step)?;
            let ms: u64 = raw.trim().parse().map_err(|_| {
                StageError::Config(format!("wait/ms duration must be milliseconds, got '{}'", raw))
            })?;
            let cancellation = ctx.cancellation().clone();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(ActionStatus::Success),
                _ = cancellation.cancelled() => Err(StageError::TimeoutExceeded),
            }
        }
    }
}

async fn execute_shell(
    step: &CompiledStep,
    params: &HashMap<String, String>,
    ctx: &mut StageContext,
) -> Result<ActionStatus, StageError> {
    let command = required(params, "command", step)?;
    let policy = match params.get("on_failure") {
        Some(value) => value.parse::<FailurePolicy>().map_err(StageError::Config)?,
        None => FailurePolicy::Fail,
    };

    let mut spec = CommandSpec::new(command);
    if let Some(dir) = params.get("working_dir") {
        spec = spec.in_dir(ctx.workspace().join(dir));
    }

    let output = ctx.run_command(spec).await?;

    if output.success() {
        if let Some(key) = params.get("capture") {
            ctx.env_mut().set(key.as_str(), output.stdout.trim());
        }
        return Ok(ActionStatus::Success);
    }

    match policy {
        FailurePolicy::Fail => Err(StageError::CommandFailed {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        }),
        FailurePolicy::Unstable => {
            warn!(step = %step.name, exit_code = output.exit_code, "Command failed, marking stage unstable");
            ctx.tolerate_last_command();
            Ok(ActionStatus::Unstable)
        }
        FailurePolicy::Continue => {
            warn!(step = %step.name, exit_code = output.exit_code, "Command failed, continuing");
            ctx.tolerate_last_command();
            Ok(ActionStatus::Success)
        }
    }
}

fn required<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
    step: &CompiledStep,
) -> Result<&'a str, StageError> {
    params.get(key).map(String::as_str).ok_or_else(|| {
        StageError::Config(format!("{} requires '{}' parameter", step.kind, key))
    })
}

fn flag(params: &HashMap<String, String>, key: &str) -> Result<bool, StageError> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(StageError::Config(format!(
            "'{}' must be true or false, got '{}'",
            key, other
        ))),
    }
}
