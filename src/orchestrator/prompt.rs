use crate::models::Incident;

/// Build the diagnosis prompt sent to every provider.
pub fn diagnosis_prompt(incident: &Incident) -> String {
    let mut prompt = format!(
        "You are diagnosing a {} incident (id: {}) in this repository.\n\n",
        incident.kind, incident.id
    );

    if let Some(ref trace) = incident.stack_trace
        && !trace.trim().is_empty()
    {
        prompt.push_str("## Stack trace\n```\n");
        prompt.push_str(trace.trim_end());
        prompt.push_str("\n```\n\n");
    }

    if !incident.failing_tests.is_empty() {
        prompt.push_str("## Failing tests\n");
        for test in &incident.failing_tests {
            prompt.push_str(&format!("- {}\n", test));
        }
        prompt.push('\n');
    }

    if !incident.affected_files.is_empty() {
        prompt.push_str("## Affected files\n");
        for file in &incident.affected_files {
            prompt.push_str(&format!("- {}\n", file));
        }
        prompt.push('\n');
    }

    if !incident.context.is_null() {
        let context = serde_json::to_string_pretty(&incident.context)
            .unwrap_or_else(|_| incident.context.to_string());
        prompt.push_str("## Context\n```json\n");
        prompt.push_str(&context);
        prompt.push_str("\n```\n\n");
    }

    prompt.push_str(
        "## Response format\n\
         Reply with a single JSON object:\n\
         {\"diagnosis\": \"<root cause, one paragraph>\", \
         \"patch\": \"<unified diff against the repository root, or empty>\", \
         \"confidence\": <0.0-1.0>, \"risk\": <0.0-1.0>}\n\
         `risk` estimates how dangerous it is to apply the patch without review.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentKind;

    #[test]
    fn test_prompt_includes_incident_details() {
        let mut incident = Incident::new("INC-7", IncidentKind::TestFail)
            .with_failing_tests(&["testFoo"])
            .with_affected_files(&["src/pager.rs"])
            .with_stack_trace("panicked at src/pager.rs:12");
        incident.context = serde_json::json!({"service": "billing"});

        let prompt = diagnosis_prompt(&incident);
        assert!(prompt.contains("test_fail incident (id: INC-7)"));
        assert!(prompt.contains("- testFoo"));
        assert!(prompt.contains("- src/pager.rs"));
        assert!(prompt.contains("panicked at src/pager.rs:12"));
        assert!(prompt.contains("\"service\": \"billing\""));
        assert!(prompt.contains("\"diagnosis\""));
    }

    #[test]
    fn test_prompt_omits_empty_sections() {
        let prompt = diagnosis_prompt(&Incident::new("I1", IncidentKind::Security));
        assert!(!prompt.contains("## Failing tests"));
        assert!(!prompt.contains("## Stack trace"));
        assert!(!prompt.contains("## Context"));
        assert!(prompt.contains("## Response format"));
    }
}
