use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    TestFail,
    RuntimeError,
    Performance,
    Security,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestFail => "test_fail",
            Self::RuntimeError => "runtime_error",
            Self::Performance => "performance",
            Self::Security => "security",
        }
    }
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_fail" => Ok(Self::TestFail),
            "runtime_error" => Ok(Self::RuntimeError),
            "performance" => Ok(Self::Performance),
            "security" => Ok(Self::Security),
            _ => Err(format!("Invalid incident type: {}", s)),
        }
    }
}

/// A detected problem handed to the pipeline by an external monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "stackTrace", skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, alias = "failingTests")]
    pub failing_tests: Vec<String>,
    #[serde(default, alias = "affectedFiles")]
    pub affected_files: Vec<String>,
    /// Opaque payload from the reporting system.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Incident {
    pub fn new(id: impl Into<String>, kind: IncidentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp: Utc::now(),
            stack_trace: None,
            failing_tests: Vec::new(),
            affected_files: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_failing_tests(mut self, tests: &[&str]) -> Self {
        self.failing_tests = tests.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_affected_files(mut self, files: &[&str]) -> Self {
        self.affected_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }
}

/// One provider's answer to the diagnosis prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderResponse {
    pub provider: String,
    /// Raw diagnosis text as returned by the provider.
    pub content: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

/// Consensus judgment over all provider responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionResult {
    pub confidence: f64,
    pub risk_score: f64,
    pub consensus_response: String,
    pub providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Every distinct patch proposed by the providers, in response order.
    #[serde(default)]
    pub candidate_patches: Vec<String>,
}

impl FusionResult {
    /// The result for zero usable responses.
    pub fn degenerate() -> Self {
        Self {
            confidence: 0.0,
            risk_score: 1.0,
            consensus_response: String::new(),
            providers: Vec::new(),
            patch: None,
            candidate_patches: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_kind_roundtrips_through_str() {
        for kind in [
            IncidentKind::TestFail,
            IncidentKind::RuntimeError,
            IncidentKind::Performance,
            IncidentKind::Security,
        ] {
            assert_eq!(IncidentKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(IncidentKind::from_str("flaky").is_err());
    }

    #[test]
    fn incident_accepts_camel_case_aliases() {
        let json = r#"{
            "id": "INC-7",
            "type": "test_fail",
            "timestamp": "2026-01-02T03:04:05Z",
            "stackTrace": "at foo (src/foo.rs:3)",
            "failingTests": ["testFoo"],
            "affectedFiles": ["src/foo.rs"],
            "context": {"service": "api"}
        }"#;
        let incident: Incident = serde_json::from_str(json).unwrap();
        assert_eq!(incident.kind, IncidentKind::TestFail);
        assert_eq!(incident.failing_tests, vec!["testFoo"]);
        assert_eq!(incident.affected_files, vec!["src/foo.rs"]);
        assert_eq!(incident.stack_trace.as_deref(), Some("at foo (src/foo.rs:3)"));
        assert_eq!(incident.context["service"], "api");
    }

    #[test]
    fn incident_minimal_json_uses_defaults() {
        let incident: Incident =
            serde_json::from_str(r#"{"id": "I1", "type": "security"}"#).unwrap();
        assert!(incident.failing_tests.is_empty());
        assert!(incident.stack_trace.is_none());
        assert!(incident.context.is_null());
    }

    #[test]
    fn incident_serializes_kind_as_type() {
        let incident = Incident::new("I2", IncidentKind::RuntimeError);
        let value = serde_json::to_value(&incident).unwrap();
        assert_eq!(value["type"], "runtime_error");
    }

    #[test]
    fn degenerate_fusion_has_zero_confidence() {
        let fusion = FusionResult::degenerate();
        assert_eq!(fusion.confidence, 0.0);
        assert!(fusion.providers.is_empty());
        assert!(fusion.patch.is_none());
    }
}
