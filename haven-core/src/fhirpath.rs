//! Mini FHIRPath parser for the subset used in search-parameter `expression`
//! fields: simple paths, choice types (`value[x]`), unions (`a|b`), and
//! extension selectors (`extension('url').value[x]`).
//!
//! Unknown constructs degrade to a primary field path derived from the raw
//! expression rather than failing — callers get a warning, never an error.

/// Parsed shape of a FHIRPath search-parameter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFhirPath {
    /// The first (or only) field path, e.g. "valueQuantity" for "value[x]".
    pub primary_field_path: String,
    /// True if the expression was a union (`a|b`).
    pub is_union: bool,
    /// All field paths to consider, in order. For `value[x]` this expands to
    /// every known FHIR choice-type suffix (`valueQuantity`, `valueString`, …).
    pub field_paths: Vec<String>,
    /// True if the expression used an `extension('url')` selector.
    pub is_extension: bool,
    pub extension_url: Option<String>,
    /// The `.value[x]` field accessed after the extension selector, if any.
    pub extension_value_field: Option<String>,
    /// Non-fatal parse warning, e.g. "unrecognized construct, degraded to raw path".
    pub warning: Option<String>,
}

/// FHIR R4 choice-type suffixes a bare `[x]` element can expand to.
/// This is the standard base-spec list; new primitive/complex types are not
/// added here since the search layer only needs the types search parameters
/// actually target (quantities, strings, dates/periods, booleans, codes).
const CHOICE_SUFFIXES: &[&str] = &[
    "Quantity",
    "String",
    "Boolean",
    "Integer",
    "DateTime",
    "Date",
    "Period",
    "Instant",
    "Range",
    "Ratio",
    "CodeableConcept",
    "Coding",
    "Code",
    "Reference",
    "Identifier",
];

/// Parse a FHIRPath `expression` string into its primary/field-path shape.
///
/// Degrades gracefully: any construct this parser doesn't recognize produces
/// `primary_field_path = raw element name` plus a `warning`, never an error.
pub fn parse_expression(expression: &str) -> ParsedFhirPath {
    let expr = expression.trim();

    // extension('url').value[x]
    if let Some(rest) = expr.strip_prefix("extension(") {
        return parse_extension_selector(rest);
    }

    // union: a|b (take the last dotted segment of each side)
    if expr.contains('|') {
        let parts: Vec<&str> = expr.split('|').map(|s| s.trim()).collect();
        let field_paths: Vec<String> = parts.iter().map(|p| last_segment(p)).collect();
        let primary = field_paths.first().cloned().unwrap_or_default();
        return ParsedFhirPath {
            primary_field_path: primary,
            is_union: true,
            field_paths,
            is_extension: false,
            extension_url: None,
            extension_value_field: None,
            warning: None,
        };
    }

    // choice type: value[x]
    if let Some(base) = expr.strip_suffix("[x]") {
        let base_name = last_segment(base);
        let field_paths: Vec<String> = CHOICE_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{}", base_name, suffix))
            .collect();
        return ParsedFhirPath {
            primary_field_path: field_paths.first().cloned().unwrap_or(base_name),
            is_union: false,
            field_paths,
            is_extension: false,
            extension_url: None,
            extension_value_field: None,
            warning: None,
        };
    }

    // simple path: take the last segment as the field name
    let segment = last_segment(expr);
    if segment.is_empty() {
        return ParsedFhirPath {
            primary_field_path: expr.to_string(),
            is_union: false,
            field_paths: vec![expr.to_string()],
            is_extension: false,
            extension_url: None,
            extension_value_field: None,
            warning: Some(format!("empty or unrecognized expression: {:?}", expression)),
        };
    }

    ParsedFhirPath {
        primary_field_path: segment.clone(),
        is_union: false,
        field_paths: vec![segment],
        is_extension: false,
        extension_url: None,
        extension_value_field: None,
        warning: None,
    }
}

/// Parse `extension('url').value[x]` given the text after `extension(`.
fn parse_extension_selector(rest: &str) -> ParsedFhirPath {
    // rest looks like: 'http://example.org/ext').value[x]
    let Some(quote_end) = find_closing_quote(rest) else {
        return ParsedFhirPath {
            primary_field_path: "extension".to_string(),
            is_union: false,
            field_paths: vec!["extension".to_string()],
            is_extension: true,
            extension_url: None,
            extension_value_field: None,
            warning: Some("malformed extension() selector, no closing quote".to_string()),
        };
    };

    let url = rest[1..quote_end].to_string();
    let after_quote = &rest[quote_end + 1..];
    let after_paren = after_quote.trim_start().strip_prefix(')').unwrap_or(after_quote);
    let value_field = after_paren.trim_start_matches('.').trim();

    if value_field.is_empty() {
        return ParsedFhirPath {
            primary_field_path: "extension".to_string(),
            is_union: false,
            field_paths: vec!["extension".to_string()],
            is_extension: true,
            extension_url: Some(url),
            extension_value_field: None,
            warning: None,
        };
    }

    // value_field may itself be a choice type: value[x]
    if let Some(base) = value_field.strip_suffix("[x]") {
        let base_name = last_segment(base);
        let field_paths: Vec<String> = CHOICE_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{}", base_name, suffix))
            .collect();
        return ParsedFhirPath {
            primary_field_path: field_paths.first().cloned().unwrap_or(base_name.clone()),
            is_union: false,
            field_paths,
            is_extension: true,
            extension_url: Some(url),
            extension_value_field: Some(base_name),
            warning: None,
        };
    }

    ParsedFhirPath {
        primary_field_path: value_field.to_string(),
        is_union: false,
        field_paths: vec![value_field.to_string()],
        is_extension: true,
        extension_url: Some(url),
        extension_value_field: Some(value_field.to_string()),
        warning: None,
    }
}

fn find_closing_quote(s: &str) -> Option<usize> {
    if !s.starts_with('\'') {
        return None;
    }
    s[1..].find('\'').map(|i| i + 1)
}

/// The last dotted segment of a path expression, e.g. "Patient.name.family" -> "family".
fn last_segment(expr: &str) -> String {
    expr.rsplit('.').next().unwrap_or(expr).trim().to_string()
}
