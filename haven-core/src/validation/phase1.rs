use crate::operation_outcome::{IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Registry of required fields per resource type (FHIR R4 base spec, min=1).
///
/// Data-driven — no hardcoded match. New resource types are added here.
static REQUIRED_FIELDS: LazyLock<HashMap<&str, &[&str]>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // Patient: no required fields in base spec
    m.insert("Observation", ["status", "code"].as_slice());
    m.insert("Encounter", ["status", "class"].as_slice());
    m.insert("Condition", ["subject"].as_slice());
    m.insert("Task", ["status", "intent"].as_slice());
    m.insert("MedicationRequest", ["status", "intent", "subject"].as_slice());
    m.insert("Procedure", ["status", "subject"].as_slice());
    m.insert("AllergyIntolerance", ["patient"].as_slice());
    m.insert("DiagnosticReport", ["status", "code"].as_slice());
    m.insert("Immunization", ["status", "vaccineCode", "patient"].as_slice());
    m.insert("Bundle", ["type"].as_slice());
    m.insert("Subscription", ["status", "criteria", "channel"].as_slice());
    m.insert("Composition", ["status", "type", "date", "author", "title"].as_slice());
    m.insert("CarePlan", ["status", "intent", "subject"].as_slice());
    m.insert("Claim", ["status", "type", "use", "patient", "provider", "priority", "insurance"].as_slice());
    m.insert("Coverage", ["status", "beneficiary", "payor"].as_slice());
    m.insert("DocumentReference", ["status", "content"].as_slice());
    m.insert("ServiceRequest", ["status", "intent", "subject"].as_slice());
    m
});

/// Phase 1: Basic validation (required fields, types, cardinality)
pub struct Phase1Validator;

impl Phase1Validator {
    /// Validate a resource's basic structure
    pub fn validate(resource: &Value) -> Result<(), OperationOutcome> {
        let mut issues = Vec::new();

        // Check resourceType is present
        let resource_type = match resource.get("resourceType").and_then(|v| v.as_str()) {
            Some(rt) => rt,
            None => {
                let mut outcome = OperationOutcome::error(
                    IssueType::Required,
                    "Missing required field: resourceType",
                );
                outcome.issue[0].expression = Some(vec!["resourceType".to_string()]);
                return Err(outcome);
            }
        };

        // Check required fields from registry
        if let Some(fields) = REQUIRED_FIELDS.get(resource_type) {
            for field in *fields {
                if resource.get(*field).is_none() {
                    issues.push(OperationOutcomeIssue {
                        severity: IssueSeverity::Error,
                        code: IssueType::Required,
                        diagnostics: Some(format!("Missing required field: {}", field)),
                        details: None,
                        expression: Some(vec![format!("{}.{}", resource_type, field)]),
                    });
                }
            }
        }

        // Data quality warnings (non-blocking)
        check_identifier_quality(resource, resource_type, &mut issues);

        // Only fail on Error-severity issues; warnings are non-blocking
        let has_errors = issues.iter().any(|i| i.severity == IssueSeverity::Error);
        if has_errors {
            Err(OperationOutcome {
                resource_type: "OperationOutcome".to_string(),
                id: None,
                issue: issues,
            })
        } else {
            Ok(())
        }
    }
}

/// Warn if identifiers lack both value and system.
fn check_identifier_quality(
    resource: &Value,
    resource_type: &str,
    issues: &mut Vec<OperationOutcomeIssue>,
) {
    if let Some(identifiers) = resource.get("identifier").and_then(|v| v.as_array()) {
        for (idx, identifier) in identifiers.iter().enumerate() {
            if identifier.get("value").is_none() && identifier.get("system").is_none() {
                issues.push(OperationOutcomeIssue {
                    severity: IssueSeverity::Warning,
                    code: IssueType::Value,
                    diagnostics: Some(format!(
                        "Identifier at index {} should have either 'value' or 'system'",
                        idx
                    )),
                    details: None,
                    expression: Some(vec![format!("{}.identifier[{}]", resource_type, idx)]),
                });
            }
        }
    }
}
