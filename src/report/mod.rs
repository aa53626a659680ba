//! Run reporting
//!
//! A [`ReportSink`] receives every stage record as it completes and the
//! finished run once it reaches a terminal state. Sink errors are logged by
//! the runner and never change a run's outcome.
//!
//! - `json` - full run as pretty JSON
//! - `junit` - JUnit XML, one test case per stage
//! - `webhook` - run JSON POSTed to an HTTP endpoint

pub mod json;
pub mod junit;
pub mod webhook;

use async_trait::async_trait;

use crate::engine::result::{Run, StageRecord};

pub use json::JsonReportSink;
pub use junit::JunitReportSink;
pub use webhook::WebhookReportSink;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook {url} responded with status {status}")]
    Status { url: String, status: u16 },
}

/// Consumer of stage and run records
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;

    /// Called after each stage, including skipped ones
    async fn stage_completed(&self, _run_id: &str, _record: &StageRecord) {}

    async fn run_completed(&self, run: &Run) -> Result<(), ReportError>;
}
