use crate::executor::{ApplyResult, PullRequestResult};
use crate::models::IncidentKind;
use crate::orchestrator::{Decision, FixStatus};
use crate::sandbox::TestResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version of the on-disk audit record layout.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One line of the audit log.
///
/// `timestamp` is left empty by callers and filled in by the logger at write
/// time unless the caller supplied one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp: None,
            incident_id: None,
            run_id: None,
            event,
        }
    }

    pub fn for_incident(incident_id: &str, run_id: Uuid, event: AuditEvent) -> Self {
        Self {
            incident_id: Some(incident_id.to_string()),
            run_id: Some(run_id),
            ..Self::new(event)
        }
    }

    pub fn action(&self) -> &'static str {
        self.event.action()
    }
}

/// Payload of an audit record, one variant per pipeline action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditEvent {
    IncidentReceived {
        kind: IncidentKind,
        #[serde(default)]
        failing_tests: Vec<String>,
        #[serde(default)]
        affected_files: Vec<String>,
    },
    DiagnosisCollected {
        providers: Vec<String>,
        responses: usize,
    },
    FusionLogged {
        confidence: f64,
        risk_score: f64,
        providers: Vec<String>,
        candidate_patches: usize,
    },
    PlanLogged {
        title: String,
        risk_score: f64,
        test_commands: Vec<String>,
        patch_sha256: String,
        patch: String,
    },
    TestResultLogged {
        result: TestResult,
    },
    DecisionLogged {
        decision: Decision,
        confidence: f64,
        risk_score: f64,
        auto_apply: bool,
    },
    ApplyLogged {
        result: ApplyResult,
    },
    PrLogged {
        result: PullRequestResult,
    },
    RollbackLogged {
        branch: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    OutcomeLogged {
        status: FixStatus,
        message: String,
    },
    PipelineFailed {
        stage: String,
        error: String,
    },
    /// Caller-defined note; lets external tooling annotate the trail.
    Note {
        message: String,
    },
}

impl AuditEvent {
    pub fn action(&self) -> &'static str {
        match self {
            Self::IncidentReceived { .. } => "incident_received",
            Self::DiagnosisCollected { .. } => "diagnosis_collected",
            Self::FusionLogged { .. } => "fusion_logged",
            Self::PlanLogged { .. } => "plan_logged",
            Self::TestResultLogged { .. } => "test_result_logged",
            Self::DecisionLogged { .. } => "decision_logged",
            Self::ApplyLogged { .. } => "apply_logged",
            Self::PrLogged { .. } => "pr_logged",
            Self::RollbackLogged { .. } => "rollback_logged",
            Self::OutcomeLogged { .. } => "outcome_logged",
            Self::PipelineFailed { .. } => "pipeline_failed",
            Self::Note { .. } => "note",
        }
    }
}

pub mod logger;
pub use logger::AuditLogger;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_flat_with_action_tag() {
        let entry = AuditEntry::for_incident(
            "I1",
            Uuid::nil(),
            AuditEvent::Note {
                message: "hello".into(),
            },
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["action"], "note");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["incident_id"], "I1");
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_entry_parses_nested_payload() {
        let line = r#"{"schema_version":1,"timestamp":"2026-03-01T00:00:00Z","incident_id":"I9","action":"test_result_logged","result":{"passed":false,"total":5,"failed":2,"duration_ms":40,"output":"2 failed"}}"#;
        let entry: AuditEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.action(), "test_result_logged");
        match entry.event {
            AuditEvent::TestResultLogged { result } => {
                assert!(!result.passed);
                assert_eq!(result.failed, 2);
                assert_eq!(result.total, 5);
            }
            other => panic!("Expected TestResultLogged, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_schema_version_defaults_to_current() {
        let line = r#"{"action":"note","message":"legacy"}"#;
        let entry: AuditEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.schema_version, SCHEMA_VERSION);
        assert!(entry.incident_id.is_none());
    }

    #[test]
    fn test_action_names_match_serde_tags() {
        let event = AuditEvent::PipelineFailed {
            stage: "plan".into(),
            error: "x".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["action"], event.action());

        let event = AuditEvent::PrLogged {
            result: PullRequestResult::failed("agent/fix-1", "t", "d", "push rejected"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["action"], event.action());
    }
}
