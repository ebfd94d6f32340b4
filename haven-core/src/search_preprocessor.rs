//! Search parameter preprocessing and validation: rejects unknown parameters,
//! malformed values, and unsupported parameter combinations before a query
//! ever reaches storage, returning a structured `OperationOutcome` instead of
//! an empty or partial result set.

use crate::error::HavenError;
use crate::search_param::{SearchParamType, SearchQuery};
use crate::search_param_registry::SearchParamRegistry;

/// Parameter names handled by the query parser itself, never looked up in
/// the per-resource registry.
const CONTROL_PARAMS: &[&str] = &[
    "_include",
    "_revinclude",
    "_count",
    "_offset",
    "_summary",
    "_elements",
    "_sort",
    "_total",
    "_id",
    "_lastUpdated",
    "_tag",
    "_profile",
    "_security",
    "_text",
    "_content",
    "_list",
    "_has",
    "_filter",
];

/// Validate a parsed `SearchQuery` against the resource type's registered
/// search parameters. Returns the first validation failure found.
pub fn validate_query(
    registry: &SearchParamRegistry,
    resource_type: &str,
    query: &SearchQuery,
) -> Result<(), HavenError> {
    for param in &query.parameters {
        if CONTROL_PARAMS.contains(&param.name.as_str()) {
            continue;
        }
        if !param_is_known(registry, resource_type, &param.name) {
            return Err(HavenError::UnknownParameter(param.name.clone()));
        }
        validate_value_for_type(&param.name, param.param_type, &param.value)?;
    }

    for chain in &query.chain_parameters {
        if !param_is_known(registry, resource_type, &chain.reference_param) {
            return Err(HavenError::UnknownParameter(chain.reference_param.clone()));
        }
        if !param_is_known(registry, &chain.target_type, &chain.target_param) {
            return Err(HavenError::UnknownParameter(format!(
                "{}.{}",
                chain.target_type, chain.target_param
            )));
        }
    }

    for has in &query.has_parameters {
        if !param_is_known(registry, &has.target_type, &has.ref_field)
            && !param_is_known(registry, &has.target_type, &has.param_name)
        {
            return Err(HavenError::UnknownParameter(format!(
                "_has:{}:{}:{}",
                has.target_type, has.ref_field, has.param_name
            )));
        }
    }

    check_date_conflicts(resource_type, query)?;
    check_single_valued_token_conflicts(resource_type, query)?;

    Ok(())
}

fn param_is_known(registry: &SearchParamRegistry, resource_type: &str, name: &str) -> bool {
    registry
        .get_definitions(resource_type)
        .iter()
        .any(|def| def.name == name || def.aliases.iter().any(|a| a == name))
}

/// Validate that a parameter's raw value is well-formed for its declared type.
fn validate_value_for_type(
    name: &str,
    param_type: SearchParamType,
    value: &str,
) -> Result<(), HavenError> {
    if value.is_empty() {
        return Err(HavenError::InvalidParameterValue {
            param: name.to_string(),
            message: "value must not be empty".to_string(),
        });
    }

    match param_type {
        SearchParamType::Date => {
            if !looks_like_fhir_date(value) {
                return Err(HavenError::InvalidParameterValue {
                    param: name.to_string(),
                    message: format!("malformed date value: {:?}", value),
                });
            }
        }
        SearchParamType::Number | SearchParamType::Quantity => {
            let numeric_part = value.split('|').next().unwrap_or(value);
            if numeric_part.parse::<f64>().is_err() {
                return Err(HavenError::InvalidParameterValue {
                    param: name.to_string(),
                    message: format!("malformed numeric value: {:?}", value),
                });
            }
        }
        _ => {}
    }

    Ok(())
}

/// Loose FHIR date/dateTime/instant grammar check: YYYY, YYYY-MM, YYYY-MM-DD,
/// or a full dateTime, each optionally followed by a timezone offset.
fn looks_like_fhir_date(value: &str) -> bool {
    let date_part = value.split(['T', 't']).next().unwrap_or(value);
    let segments: Vec<&str> = date_part.splitn(3, '-').collect();
    match segments.len() {
        1 => segments[0].len() == 4 && segments[0].chars().all(|c| c.is_ascii_digit()),
        2 => {
            segments[0].len() == 4
                && segments[0].chars().all(|c| c.is_ascii_digit())
                && segments[1].len() == 2
                && segments[1].chars().all(|c| c.is_ascii_digit())
        }
        3 => {
            segments[0].len() == 4
                && segments[0].chars().all(|c| c.is_ascii_digit())
                && segments[1].len() == 2
                && segments[1].chars().all(|c| c.is_ascii_digit())
                && segments[2].len() >= 2
                && segments[2].chars().take(2).all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

/// Reject contradictory date-prefix combinations on the same field, e.g.
/// `date=gt2020-01-01&date=lt2019-01-01` (an empty range) or two `eq`
/// values that can never both hold.
fn check_date_conflicts(_resource_type: &str, query: &SearchQuery) -> Result<(), HavenError> {
    use std::collections::HashMap;

    let mut by_name: HashMap<&str, Vec<&crate::search_param::SearchParameter>> = HashMap::new();
    for p in &query.parameters {
        if p.param_type == SearchParamType::Date {
            by_name.entry(p.name.as_str()).or_default().push(p);
        }
    }

    for (name, params) in by_name {
        let mut lower_bound: Option<&str> = None;
        let mut upper_bound: Option<&str> = None;
        let mut eq_count = 0;

        for p in &params {
            match p.prefix.as_deref() {
                Some("gt") | Some("ge") | Some("sa") => lower_bound = Some(p.value.as_str()),
                Some("lt") | Some("le") | Some("eb") => upper_bound = Some(p.value.as_str()),
                Some("eq") | None => eq_count += 1,
                _ => {}
            }
        }

        if eq_count > 1 {
            return Err(HavenError::UnsupportedParameterCombination(format!(
                "multiple date range parameters for {:?} without a qualifier: repeated \
                 unprefixed values are ambiguous (use ge/le to express a range)",
                name
            )));
        }

        if eq_count >= 1 && (lower_bound.is_some() || upper_bound.is_some()) {
            return Err(HavenError::UnsupportedParameterCombination(format!(
                "mixing an unqualified date value with a prefixed range bound is not \
                 supported for parameter {:?}",
                name
            )));
        }

        if let (Some(lo), Some(hi)) = (lower_bound, upper_bound)
            && lo > hi
        {
            return Err(HavenError::UnsupportedParameterCombination(format!(
                "empty date range for parameter {:?}: lower bound {:?} is after upper bound {:?}",
                name, lo, hi
            )));
        }
    }

    Ok(())
}

/// Reject repeated values for search parameters that are inherently
/// single-valued (can only ever match one value per resource), since a
/// second distinct value makes the query unsatisfiable by definition.
fn check_single_valued_token_conflicts(
    _resource_type: &str,
    query: &SearchQuery,
) -> Result<(), HavenError> {
    const SINGLE_VALUED: &[&str] = &["_id", "gender", "status", "clinical-status"];

    use std::collections::HashMap;
    let mut by_name: HashMap<&str, Vec<&str>> = HashMap::new();
    for p in &query.parameters {
        if SINGLE_VALUED.contains(&p.name.as_str()) && p.modifier.is_none() {
            by_name.entry(p.name.as_str()).or_default().push(p.value.as_str());
        }
    }

    for (name, values) in by_name {
        let distinct: std::collections::HashSet<&str> = values.into_iter().collect();
        if distinct.len() > 1 {
            return Err(HavenError::UnsupportedParameterCombination(format!(
                "conflicting values for single-valued parameter {:?}: {:?}",
                name, distinct
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_parameter_rejected() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("bogus-param=1").unwrap();
        let result = validate_query(&registry, "Patient", &query);
        assert!(matches!(result, Err(HavenError::UnknownParameter(_))));
    }

    #[test]
    fn test_known_parameter_passes() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("family=Smith").unwrap();
        assert!(validate_query(&registry, "Patient", &query).is_ok());
    }

    #[test]
    fn test_control_params_always_allowed() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("_count=10&_summary=true").unwrap();
        assert!(validate_query(&registry, "Patient", &query).is_ok());
    }

    #[test]
    fn test_malformed_date_rejected() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("birthdate=not-a-date").unwrap();
        let result = validate_query(&registry, "Patient", &query);
        assert!(matches!(result, Err(HavenError::InvalidParameterValue { .. })));
    }

    #[test]
    fn test_valid_date_formats() {
        assert!(looks_like_fhir_date("2020"));
        assert!(looks_like_fhir_date("2020-01"));
        assert!(looks_like_fhir_date("2020-01-15"));
        assert!(looks_like_fhir_date("2020-01-15T10:00:00Z"));
        assert!(!looks_like_fhir_date("not-a-date"));
        assert!(!looks_like_fhir_date("2020-1-5"));
    }

    #[test]
    fn test_conflicting_date_range_rejected() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("birthdate=gt2020-01-01&birthdate=lt2019-01-01").unwrap();
        let result = validate_query(&registry, "Patient", &query);
        assert!(matches!(
            result,
            Err(HavenError::UnsupportedParameterCombination(_))
        ));
    }

    #[test]
    fn test_non_conflicting_date_range_passes() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("birthdate=ge2019-01-01&birthdate=lt2020-01-01").unwrap();
        assert!(validate_query(&registry, "Patient", &query).is_ok());
    }

    #[test]
    fn test_repeated_unprefixed_date_rejected_with_range_diagnostic() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("birthdate=1987-02-20&birthdate=1987-02-21").unwrap();
        let result = validate_query(&registry, "Patient", &query);
        match result {
            Err(HavenError::UnsupportedParameterCombination(msg)) => {
                assert!(msg.contains("multiple date range parameters"));
                assert!(msg.contains("without a qualifier"));
            }
            other => panic!("expected UnsupportedParameterCombination, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_unprefixed_and_prefixed_date_rejected() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("birthdate=1987-02-20&birthdate=ge2020-01-01").unwrap();
        let result = validate_query(&registry, "Patient", &query);
        assert!(matches!(
            result,
            Err(HavenError::UnsupportedParameterCombination(_))
        ));
    }

    #[test]
    fn test_conflicting_single_valued_param_rejected() {
        let registry = SearchParamRegistry::new();
        let query = SearchQuery::parse("gender=male&gender=female").unwrap();
        let result = validate_query(&registry, "Patient", &query);
        assert!(matches!(
            result,
            Err(HavenError::UnsupportedParameterCombination(_))
        ));
    }

    #[test]
    fn test_malformed_numeric_value_rejected() {
        let registry = SearchParamRegistry::new();
        let mut query = SearchQuery::parse("").unwrap();
        query.parameters.push(crate::search_param::SearchParameter {
            name: "value-quantity".to_string(),
            value: "not-a-number".to_string(),
            modifier: None,
            prefix: None,
            param_type: SearchParamType::Quantity,
        });
        let result = validate_query(&registry, "Observation", &query);
        assert!(matches!(result, Err(HavenError::InvalidParameterValue { .. })));
    }
}
