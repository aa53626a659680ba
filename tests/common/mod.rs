#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_runner::engine::actions::shell::{CommandOutput, CommandRunner, CommandSpec};
use pipeline_runner::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_pipeline(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).expect("Failed to write pipeline file");
    path
}

pub fn simple_pipeline(name: &str) -> String {
    format!(
        r#"
name: {}
stages:
  - name: Build
    steps:
      - uses: wait/ms
        with:
          duration: "1"
"#,
        name
    )
}

pub fn options(timeout: Duration) -> RunnerOptions {
    RunnerOptions {
        timeout,
        ..Default::default()
    }
}

pub fn trigger(branch: &str) -> Trigger {
    Trigger::new(branch, "0000000")
}

/// Shared, ordered log of which actions and hooks ran
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }
}

/// Stage whose action records its name and returns `result`
pub fn recording_stage(
    name: &str,
    log: &CallLog,
    result: fn() -> Result<ActionStatus, StageError>,
) -> Stage {
    let log = log.clone();
    let entry = name.to_string();
    Stage::from_fn(name, move |_| {
        log.push(entry.clone());
        result()
    })
}

/// Hook that records `entry` when it runs
pub fn recording_hook(log: &CallLog, entry: &str) -> Arc<dyn StageAction> {
    let log = log.clone();
    let entry = entry.to_string();
    action_fn(move |_| {
        log.push(entry.clone());
        Ok(ActionStatus::Success)
    })
}

pub fn succeed() -> Result<ActionStatus, StageError> {
    Ok(ActionStatus::Success)
}

pub fn unstable() -> Result<ActionStatus, StageError> {
    Ok(ActionStatus::Unstable)
}

pub fn fail() -> Result<ActionStatus, StageError> {
    Err(StageError::ActionFailed("boom".to_string()))
}

/// Command runner answering from a script instead of spawning processes
#[derive(Default)]
pub struct ScriptedCommandRunner {
    responses: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix`
    pub fn respond(mut self, prefix: &str, exit_code: i32, stdout: &str) -> Self {
        self.responses.push((
            prefix.to_string(),
            CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, spec: &CommandSpec, _env: &Environment) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.command.clone());
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| spec.command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}
