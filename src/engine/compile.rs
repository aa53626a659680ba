//! Turn a YAML pipeline definition into an executable [`Pipeline`]

use std::collections::HashSet;
use std::sync::Arc;

use super::actions::steps::{CompiledStep, StepsAction};
use super::error::CompileError;
use super::outcome::PostCondition;
use super::stage::{Gate, Pipeline, PostHooks, Stage};
use crate::pipeline::definition::{
    EnvironmentBlock, GateDefinition, PipelineDefinition, PostDefinition, StepDefinition,
};

/// Validate a definition and build its stages
pub fn compile(def: &PipelineDefinition) -> Result<Pipeline, CompileError> {
    if def.stages.is_empty() {
        return Err(CompileError::NoStages(def.name.clone()));
    }

    let mut seen = HashSet::new();
    let mut pipeline = Pipeline::new(&def.name);
    pipeline.environment = def.environment.clone();

    for stage_def in &def.stages {
        if !seen.insert(stage_def.name.as_str()) {
            return Err(CompileError::DuplicateStage(stage_def.name.clone()));
        }
        if stage_def.steps.is_empty() {
            return Err(CompileError::NoSteps(stage_def.name.clone()));
        }

        let steps = compile_steps(&stage_def.name, &stage_def.steps)?;
        let action = StepsAction::new(stage_def.environment.clone(), steps);

        let mut stage = Stage::new(&stage_def.name, Arc::new(action));
        if let Some(gate) = &stage_def.when {
            stage = stage.when(compile_gate(&stage_def.name, gate)?);
        }
        for (condition, hook) in compile_post(&stage_def.name, &stage_def.post)? {
            stage = stage.post(condition, hook);
        }

        pipeline = pipeline.stage(stage);
    }

    pipeline.post = PostHooks::new();
    for (condition, hook) in compile_post(&def.name, &def.post)? {
        pipeline.post.add(condition, hook);
    }

    Ok(pipeline)
}

impl Pipeline {
    pub fn from_definition(def: &PipelineDefinition) -> Result<Self, CompileError> {
        compile(def)
    }
}

fn compile_steps(stage: &str, steps: &[StepDefinition]) -> Result<Vec<CompiledStep>, CompileError> {
    steps
        .iter()
        .map(|step| {
            CompiledStep::compile(step).map_err(|message| CompileError::InvalidStep {
                stage: stage.to_string(),
                message,
            })
        })
        .collect()
}

fn compile_gate(stage: &str, gate: &GateDefinition) -> Result<Gate, CompileError> {
    let invalid = |message: String| CompileError::InvalidGate {
        stage: stage.to_string(),
        message,
    };

    match gate {
        GateDefinition::Branch { branch } => {
            if branch.trim().is_empty() {
                return Err(invalid("branch pattern is empty".to_string()));
            }
            glob::Pattern::new(branch)
                .map_err(|e| invalid(format!("branch pattern '{}': {}", branch, e)))?;
            Ok(Gate::branch(branch.as_str()))
        }
        GateDefinition::Expression(condition) => {
            if condition.trim().is_empty() {
                return Err(invalid("condition is empty".to_string()));
            }
            Ok(Gate::expression(condition.as_str()))
        }
    }
}

fn compile_post(
    owner: &str,
    post: &PostDefinition,
) -> Result<Vec<(PostCondition, Arc<StepsAction>)>, CompileError> {
    let lists = [
        (PostCondition::Success, &post.success),
        (PostCondition::Unstable, &post.unstable),
        (PostCondition::Failure, &post.failure),
        (PostCondition::Aborted, &post.aborted),
        (PostCondition::Always, &post.always),
    ];

    let mut hooks = Vec::new();
    for (condition, steps) in lists {
        if steps.is_empty() {
            continue;
        }
        let steps = compile_steps(owner, steps)?;
        hooks.push((
            condition,
            Arc::new(StepsAction::new(EnvironmentBlock::default(), steps)),
        ));
    }
    Ok(hooks)
}
