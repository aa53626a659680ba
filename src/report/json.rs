//! JSON run report

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{ReportError, ReportSink};
use crate::engine::result::Run;

/// Writes the finished run as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn run_completed(&self, run: &Run) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(run)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        tracing::info!("Wrote JSON report to {}", self.path.display());
        Ok(())
    }
}
