//! Isolated, time- and output-bounded execution of a plan's test commands.

pub mod process;
pub mod report;
pub mod worktree;

pub use process::{ProcessOutput, ProcessRunner, RunOptions, ShellRunner};
pub use report::TestReport;

use crate::config::SandboxSection;
use crate::errors::SandboxError;
use crate::planner::Plan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use worktree::ScratchWorktree;

/// Verdict of one sandbox run. `passed` holds exactly when `failed == 0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub passed: bool,
    pub total: u32,
    pub failed: u32,
    pub duration_ms: u64,
    pub output: String,
}

impl TestResult {
    pub fn from_counts(total: u32, failed: u32, duration: Duration, output: String) -> Self {
        Self {
            passed: failed == 0,
            total: total.max(failed),
            failed,
            duration_ms: duration.as_millis() as u64,
            output,
        }
    }

    /// Result for a run that never produced a verdict (timeout, crash, spawn failure).
    pub fn error(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            passed: false,
            total: 0,
            failed: 1,
            duration_ms: duration.as_millis() as u64,
            output: message.into(),
        }
    }

    /// Copy with `output` cut to at most `max_bytes`, for audit records.
    pub fn truncated(&self, max_bytes: usize) -> Self {
        let mut copy = self.clone();
        if copy.output.len() > max_bytes {
            let cut = copy.output.floor_char_boundary(max_bytes);
            copy.output.truncate(cut);
            copy.output.push_str("\n[output truncated]");
        }
        copy
    }
}

/// Validates a plan before anything touches the shared tree.
#[async_trait]
pub trait TestSandbox: Send + Sync {
    /// Never fails: execution problems become a failing `TestResult`.
    async fn run_tests(&self, plan: &Plan) -> TestResult;
}

pub struct SandboxRunner {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
    max_output_bytes: usize,
    workdir: Option<PathBuf>,
    /// Repository and base ref to create scratch worktrees from
    isolate_from: Option<(PathBuf, String)>,
}

impl SandboxRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &SandboxSection) -> Self {
        Self {
            runner,
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
            workdir: None,
            isolate_from: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run commands directly in `dir` (no patch is applied).
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Run commands in a scratch worktree of `base` in `repo`, with the plan's
    /// patch applied. `base` should be the branch fixes are merged into.
    pub fn isolated(mut self, repo: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        self.isolate_from = Some((repo.into(), base.into()));
        self
    }

    fn resolve(&self, output: ProcessOutput, elapsed: Duration) -> TestResult {
        let text = output.combined();

        let (mut total, mut failed) = if let Some(report) = output.report {
            (report.total, report.failed)
        } else if let Some(summary) = report::parse_summary(&text) {
            (summary.total, summary.failed)
        } else {
            tracing::debug!("no test summary found, using output heuristic");
            let failed = report::heuristic_failed(&text) || !output.success();
            (1, u32::from(failed))
        };

        if !output.success() && failed == 0 {
            failed = 1;
            total = total.max(1);
        }

        TestResult::from_counts(total, failed, elapsed, text)
    }
}

#[async_trait]
impl TestSandbox for SandboxRunner {
    async fn run_tests(&self, plan: &Plan) -> TestResult {
        let started = Instant::now();

        if plan.test_commands.is_empty() {
            return TestResult::error(SandboxError::NoCommands.to_string(), started.elapsed());
        }
        let command = plan.test_commands.join(" && ");

        let scratch = match self.isolate_from {
            Some((ref repo, ref base)) => {
                match ScratchWorktree::create(repo, base, &plan.patch).await {
                    Ok(tree) => Some(tree),
                    Err(e) => {
                        return TestResult::error(
                            format!("Failed to prepare sandbox: {:#}", e),
                            started.elapsed(),
                        );
                    }
                }
            }
            None => None,
        };

        let mut opts = RunOptions::new(self.timeout, self.max_output_bytes);
        opts.cwd = scratch
            .as_ref()
            .map(|tree| tree.path().to_path_buf())
            .or_else(|| self.workdir.clone());

        tracing::info!(command = %command, timeout_secs = self.timeout.as_secs(), "running sandbox tests");
        let result = match self.runner.run(&command, &opts).await {
            Ok(output) => self.resolve(output, started.elapsed()),
            Err(e) => {
                tracing::warn!("sandbox run failed: {}", e);
                TestResult::error(e.to_string(), started.elapsed())
            }
        };

        if let Some(tree) = scratch {
            tree.remove().await;
        }

        tracing::info!(
            passed = result.passed,
            total = result.total,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "sandbox finished"
        );
        result
    }
}
