//! Pipeline types and definitions
//!
//! This module contains all types for defining and parsing pipelines:
//! - `definition` - PipelineDefinition, StageDefinition, StepDefinition, PostDefinition
//! - `environment` - Environment, Trigger and ArtifactHandle for runtime state
//! - `expressions` - Expression evaluation for `${{ }}` syntax and gate conditions
//! - `step` - StepKind parsing for "uses" fields
//! - `loader` - Load pipelines from files and directories
//! - `tools` - Preflight lookup of required external tools

pub mod definition;
pub mod environment;
pub mod expressions;
pub mod loader;
pub mod step;
pub mod tools;

// Re-export all public types for convenience
pub use definition::{
    EnvironmentBlock, GateDefinition, PipelineDefinition, PipelineOptions, PostDefinition,
    StageDefinition, StepDefinition,
};
pub use environment::{ArtifactHandle, Environment, Trigger};
pub use expressions::{evaluate_condition, interpolate, interpolate_params, ExpressionError};
pub use loader::{LoadError, PipelineLoader};
pub use step::{FailurePolicy, StepKind};
pub use tools::{check_tools, missing_tools, ToolStatus};
