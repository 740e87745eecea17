use crate::executor::{ApplyResult, PullRequestResult};
use crate::sandbox::TestResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Diagnose,
    Fuse,
    Plan,
    Sandbox,
    Decide,
    Apply,
    PullRequest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Diagnose => "diagnose",
            Stage::Fuse => "fuse",
            Stage::Plan => "plan",
            Stage::Sandbox => "sandbox",
            Stage::Decide => "decide",
            Stage::Apply => "apply",
            Stage::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which terminal branch a tested plan goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Apply,
    CreatePr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Applied,
    PrCreated,
    TestsFailed,
    Rejected,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Applied => "applied",
            FixStatus::PrCreated => "pr_created",
            FixStatus::TestsFailed => "tests_failed",
            FixStatus::Rejected => "rejected",
        }
    }

    /// Whether the run produced a change (merged or up for review).
    pub fn is_success(&self) -> bool {
        matches!(self, FixStatus::Applied | FixStatus::PrCreated)
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for unattended application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub auto_apply: bool,
    /// Risk must be strictly below this
    pub max_risk: f64,
    /// Confidence must be strictly above this
    pub min_confidence: f64,
}

impl DecisionPolicy {
    pub fn decide(&self, confidence: f64, risk_score: f64) -> Decision {
        if self.auto_apply && risk_score < self.max_risk && confidence > self.min_confidence {
            Decision::Apply
        } else {
            Decision::CreatePr
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            auto_apply: false,
            max_risk: 0.4,
            min_confidence: 0.7,
        }
    }
}

/// Terminal outcome of one `handle_incident` run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixResult {
    pub run_id: Uuid,
    pub incident_id: String,
    pub status: FixStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestResult>,
    pub message: String,
}

impl FixResult {
    pub fn new(run_id: Uuid, incident_id: &str, status: FixStatus, message: impl Into<String>) -> Self {
        Self {
            run_id,
            incident_id: incident_id.to_string(),
            status,
            patch: None,
            test_result: None,
            apply: None,
            pull_request: None,
            message: message.into(),
        }
    }

    pub fn rejected(run_id: Uuid, incident_id: &str, message: impl Into<String>) -> Self {
        Self::new(run_id, incident_id, FixStatus::Rejected, message)
    }
}
