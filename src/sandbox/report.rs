//! Test verdict extraction.
//!
//! Preferred source is a structured report written by the test command to
//! the file named in `REMEDY_TEST_REPORT`. Text parsing of a
//! `N failed, M passed, T total` summary is kept as a compatibility fallback.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Environment variable naming the file a test command may write its report to.
pub const REPORT_ENV: &str = "REMEDY_TEST_REPORT";

/// Highest report version this build understands.
pub const REPORT_VERSION: u32 = 1;

/// Machine-readable test report, `{"version":1,"total":5,"failed":0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub version: u32,
    pub total: u32,
    pub failed: u32,
}

impl TestReport {
    /// Parse a report, rejecting versions newer than `REPORT_VERSION`.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let report: TestReport = serde_json::from_str(content.trim())?;
        if report.version == 0 || report.version > REPORT_VERSION {
            anyhow::bail!("Unsupported test report version {}", report.version);
        }
        Ok(report)
    }
}

/// Counts recovered from free-form test output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: u32,
    pub failed: u32,
}

static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").expect("valid regex"));
static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed").expect("valid regex"));
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+total").expect("valid regex"));

fn last_count(re: &Regex, text: &str) -> Option<u32> {
    re.captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Find a `N failed, M passed, T total` style summary. Any subset of the
/// three counts is accepted; the last occurrence of each wins.
pub fn parse_summary(output: &str) -> Option<Summary> {
    let failed = last_count(&FAILED_RE, output);
    let passed = last_count(&PASSED_RE, output);
    let total = last_count(&TOTAL_RE, output);

    if failed.is_none() && passed.is_none() && total.is_none() {
        return None;
    }

    let failed = failed.unwrap_or(0);
    let total = total.unwrap_or_else(|| failed + passed.unwrap_or(0));
    Some(Summary {
        total: total.max(failed),
        failed,
    })
}

/// Last-resort verdict when no summary exists: fail iff the output mentions `error`.
pub fn heuristic_failed(output: &str) -> bool {
    output.contains("error")
}
