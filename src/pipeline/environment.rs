//! Run environment shared by every stage of a pipeline run
//!
//! The environment replaces the ambient global variables of a CI host: it is
//! seeded from the trigger when a run starts and then mutated in place as
//! stages resolve values (commit ids, image tags, archived artifacts).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub const BUILD_NUMBER: &str = "BUILD_NUMBER";
pub const BUILD_ID: &str = "BUILD_ID";
pub const JOB_NAME: &str = "JOB_NAME";
pub const BRANCH_NAME: &str = "BRANCH_NAME";
pub const GIT_COMMIT: &str = "GIT_COMMIT";
pub const WORKSPACE: &str = "WORKSPACE";

/// Source-control event that starts a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub branch: String,
    pub commit_ref: String,
}

impl Trigger {
    pub fn new(branch: impl Into<String>, commit_ref: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit_ref: commit_ref.into(),
        }
    }
}

/// Files archived by a stage so later stages can locate them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Handle name used in expressions (`artifacts.<name>.path`)
    pub name: String,

    /// Glob pattern the handle was resolved from
    pub pattern: String,

    /// Matched paths, sorted
    pub paths: Vec<PathBuf>,

    /// SHA-256 fingerprints keyed by path, when fingerprinting was requested
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fingerprints: BTreeMap<PathBuf, String>,
}

impl ArtifactHandle {
    /// First matched path
    pub fn primary(&self) -> Option<&PathBuf> {
        self.paths.first()
    }
}

/// Mutable key/value context of a single run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    vars: HashMap<String, String>,

    #[serde(default)]
    artifacts: HashMap<String, ArtifactHandle>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the well-known run variables from a trigger
    pub fn from_trigger(
        trigger: &Trigger,
        pipeline: &str,
        build_number: u64,
        run_id: &str,
        workspace: &std::path::Path,
    ) -> Self {
        let mut env = Self::new();
        env.set(BUILD_NUMBER, build_number.to_string());
        env.set(BUILD_ID, run_id);
        env.set(JOB_NAME, pipeline);
        env.set(BRANCH_NAME, trigger.branch.as_str());
        env.set(GIT_COMMIT, trigger.commit_ref.as_str());
        env.set(WORKSPACE, workspace.display().to_string());
        env
    }

    /// Set a variable, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Branch the run was triggered for
    pub fn branch(&self) -> Option<&str> {
        self.get(BRANCH_NAME)
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Merge variables from another source, overwriting existing keys
    pub fn merge(&mut self, vars: &HashMap<String, String>) {
        for (key, value) in vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Register an artifact handle under its name
    pub fn add_artifact(&mut self, handle: ArtifactHandle) {
        self.artifacts.insert(handle.name.clone(), handle);
    }

    pub fn artifact(&self, name: &str) -> Option<&ArtifactHandle> {
        self.artifacts.get(name)
    }

    pub fn artifacts(&self) -> &HashMap<String, ArtifactHandle> {
        &self.artifacts
    }
}
