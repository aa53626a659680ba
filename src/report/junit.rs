//! JUnit XML run report
//!
//! CI dashboards read JUnit natively, so each stage becomes a test case:
//! `Failure` maps to `<failure>`, `Aborted` to `<error>` and skipped stages
//! to `<skipped>`. Captured output goes into `<system-out>`, with terminal
//! colour codes and other characters XML 1.0 forbids removed.

use async_trait::async_trait;
use regex::Regex;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::{ReportError, ReportSink};
use crate::engine::outcome::StageOutcome;
use crate::engine::result::Run;

#[derive(Debug, Clone)]
pub struct JunitReportSink {
    path: PathBuf,
}

impl JunitReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for JunitReportSink {
    fn name(&self) -> &str {
        "junit"
    }

    async fn run_completed(&self, run: &Run) -> Result<(), ReportError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, render(run)).await?;
        tracing::info!("Wrote JUnit report to {}", self.path.display());
        Ok(())
    }
}

/// Render a run as a JUnit `testsuite` document
pub fn render(run: &Run) -> String {
    let count = |f: fn(&StageOutcome) -> bool| run.stages.iter().filter(|s| f(&s.outcome)).count();
    let failures = count(|o| *o == StageOutcome::Failure);
    let errors = count(|o| *o == StageOutcome::Aborted);
    let skipped = count(StageOutcome::is_skipped);
    let seconds = run.duration_ms().unwrap_or(0) as f64 / 1000.0;

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\">",
        escape(&format!("{} #{}", run.pipeline, run.number)),
        run.stages.len(),
        failures,
        errors,
        skipped,
        seconds
    );

    for stage in &run.stages {
        let _ = write!(
            xml,
            "  <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
            escape(&run.pipeline),
            escape(&stage.name),
            stage.duration_ms as f64 / 1000.0
        );

        let message = escape(stage.error.as_deref().unwrap_or_default());
        let body = match stage.outcome {
            StageOutcome::Failure => Some(format!("    <failure message=\"{}\"/>\n", message)),
            StageOutcome::Aborted => Some(format!("    <error message=\"{}\"/>\n", message)),
            StageOutcome::Skipped(reason) => {
                Some(format!("    <skipped message=\"{}\"/>\n", escape(&reason.to_string())))
            }
            StageOutcome::Success | StageOutcome::Unstable => None,
        };
        let output = stage.captured_text();

        if body.is_none() && output.is_empty() {
            xml.push_str("/>\n");
            continue;
        }

        xml.push_str(">\n");
        if let Some(body) = body {
            xml.push_str(&body);
        }
        if !output.is_empty() {
            let _ = writeln!(xml, "    <system-out>{}</system-out>", escape(&output));
        }
        xml.push_str("  </testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    xml
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..
    )
}

fn escape(text: &str) -> String {
    let text = ANSI_ESCAPE.replace_all(text, "");
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if !is_xml_char(c) => {}
            _ => out.push(c),
        }
    }
    out
}
