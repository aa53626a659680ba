//! Webhook run report

use async_trait::async_trait;
use std::time::Duration;

use super::{ReportError, ReportSink};
use crate::engine::result::Run;

/// POSTs the finished run as JSON to a URL
pub struct WebhookReportSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookReportSink {
    pub fn new(url: impl Into<String>) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReportSink for WebhookReportSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn run_completed(&self, run: &Run) -> Result<(), ReportError> {
        let response = self.client.post(&self.url).json(run).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        tracing::debug!("Delivered run #{} to {}", run.number, self.url);
        Ok(())
    }
}
