use axum::http::StatusCode;
use axum::response::Json;
use haven_core::compartment::CompartmentDef;
use haven_core::OperationOutcome;
use serde_json::{json, Value};

use crate::auth::AuthUser;

/// Check if a single resource is accessible under compartment rules.
///
/// Returns Ok(()) if access is allowed, Err with 403 response if denied.
///
/// Rules:
/// - No auth user (auth disabled) → allow
/// - Not patient-scoped (user/system/APIKey/Basic) → allow
/// - Patient-scoped but no patient_id → deny
/// - Otherwise → check compartment membership
pub fn check_compartment_access(
    auth_user: Option<&AuthUser>,
    compartment: &CompartmentDef,
    resource_type: &str,
    resource: &Value,
) -> Result<(), (StatusCode, Json<Value>)> {
    let Some(user) = auth_user else {
        return Ok(());
    };

    if !user.is_patient_scoped() {
        return Ok(());
    }

    let Some(ref patient_id) = user.patient_id else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!(OperationOutcome::forbidden(
                "Patient-scoped token without patient context"
            ))),
        ));
    };

    // Non-compartment resources (Practitioner, Organization, Bundle) are readable
    // by patient-scoped tokens for reference resolution
    if !compartment.is_in_compartment(resource_type) {
        return Ok(());
    }

    if compartment.resource_belongs_to_patient(resource_type, resource, patient_id) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(json!(OperationOutcome::forbidden(
                "Access denied: resource is not in patient compartment"
            ))),
        ))
    }
}

/// Filter a list of resources by compartment membership.
///
/// Returns only resources that belong to the patient's compartment.
/// If no compartment filtering is needed, returns all resources.
pub fn filter_by_compartment(
    auth_user: Option<&AuthUser>,
    compartment: &CompartmentDef,
    resource_type: &str,
    resources: Vec<Value>,
) -> Vec<Value> {
    let Some(user) = auth_user else {
        return resources;
    };

    if !user.is_patient_scoped() {
        return resources;
    }

    let Some(ref patient_id) = user.patient_id else {
        return Vec::new();
    };

    // Non-compartment resources pass through
    if !compartment.is_in_compartment(resource_type) {
        return resources;
    }

    resources
        .into_iter()
        .filter(|r| compartment.resource_belongs_to_patient(resource_type, r, patient_id))
        .collect()
}
