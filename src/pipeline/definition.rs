//! Pipeline, Stage, and Step definitions
//!
//! This module contains the declarative YAML types of a pipeline. They are
//! plain data; `engine::compile` validates them and turns them into
//! executable stages.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Pipeline
// ============================================================================

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name (required)
    pub name: String,

    /// External tools the stages expect on PATH
    #[serde(default)]
    pub tools: Vec<String>,

    /// Run policy: timeout, history, serialization
    #[serde(default)]
    pub options: PipelineOptions,

    /// Variables computed once at run start, in declaration order
    #[serde(default)]
    pub environment: EnvironmentBlock,

    /// Stages in execution order
    pub stages: Vec<StageDefinition>,

    /// Steps run after the whole pipeline, keyed by outcome
    #[serde(default)]
    pub post: PostDefinition,
}

/// Run policy of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Wall-clock deadline for the entire run
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Number of completed runs kept in history
    #[serde(default = "default_max_history_runs")]
    pub max_history_runs: usize,

    /// Allow runs to overlap instead of queueing them
    #[serde(default)]
    pub allow_concurrent: bool,
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_max_history_runs() -> usize {
    10
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_history_runs: default_max_history_runs(),
            allow_concurrent: false,
        }
    }
}

/// Ordered `KEY: template` pairs
///
/// YAML mappings are read in document order so later entries can reference
/// earlier ones (`IMAGE_TAG: "${{ env.APP_NAME }}:${{ env.BUILD_NUMBER }}"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBlock(pub Vec<(String, String)>);

impl EnvironmentBlock {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'de> Deserialize<'de> for EnvironmentBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BlockVisitor;

        impl<'de> Visitor<'de> for BlockVisitor {
            type Value = EnvironmentBlock;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of variable names to values")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(EnvironmentBlock::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, serde_yaml::Value>()? {
                    let value = match value {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Number(n) => n.to_string(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        serde_yaml::Value::Null => String::new(),
                        _ => {
                            return Err(serde::de::Error::custom(format!(
                                "environment value for '{}' must be a scalar",
                                key
                            )))
                        }
                    };
                    entries.push((key, value));
                }
                Ok(EnvironmentBlock(entries))
            }
        }

        deserializer.deserialize_any(BlockVisitor)
    }
}

impl Serialize for EnvironmentBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// ============================================================================
// Stage
// ============================================================================

/// A named unit of pipeline work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name, unique within the pipeline
    pub name: String,

    /// Condition to run this stage
    #[serde(default)]
    pub when: Option<GateDefinition>,

    /// Variables set when the stage starts
    #[serde(default)]
    pub environment: EnvironmentBlock,

    /// Steps to execute
    pub steps: Vec<StepDefinition>,

    /// Steps run after this stage, keyed by outcome
    #[serde(default)]
    pub post: PostDefinition,
}

/// Condition deciding whether a stage runs
///
/// Either an expression string or `{ branch: <glob> }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateDefinition {
    Expression(String),
    Branch { branch: String },
}

/// Post-hook steps keyed by outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostDefinition {
    #[serde(default)]
    pub success: Vec<StepDefinition>,

    #[serde(default)]
    pub failure: Vec<StepDefinition>,

    #[serde(default)]
    pub unstable: Vec<StepDefinition>,

    #[serde(default)]
    pub aborted: Vec<StepDefinition>,

    /// Runs after the outcome-specific steps, whatever the outcome
    #[serde(default)]
    pub always: Vec<StepDefinition>,
}

impl PostDefinition {
    pub fn is_empty(&self) -> bool {
        self.success.is_empty()
            && self.failure.is_empty()
            && self.unstable.is_empty()
            && self.aborted.is_empty()
            && self.always.is_empty()
    }
}

// ============================================================================
// Step
// ============================================================================

/// A single step in a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name (for logging)
    pub name: Option<String>,

    /// Step to use (e.g., "shell/exec", "artifact/archive")
    pub uses: String,

    /// Step parameters
    #[serde(default)]
    pub with: HashMap<String, serde_yaml::Value>,
}

impl StepDefinition {
    /// Name used in logs: explicit name or the `uses` value
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uses)
    }
}
