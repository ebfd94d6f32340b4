/// FHIR search query parsed from HTTP query parameters
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub parameters: Vec<SearchParameter>,
    pub chain_parameters: Vec<ChainParameter>,
    pub has_parameters: Vec<HasParameter>,
    pub include: Vec<String>,
    pub revinclude: Vec<String>,
    pub count: Option<usize>,
    pub offset: Option<usize>,
    pub summary: Option<SummaryMode>,
    pub elements: Vec<String>,
}

/// A chained search parameter: `subject:Patient.name=Doe`
#[derive(Debug, Clone)]
pub struct ChainParameter {
    /// The reference parameter on the source resource (e.g. "subject")
    pub reference_param: String,
    /// The target resource type (e.g. "Patient")
    pub target_type: String,
    /// The search parameter on the target resource (e.g. "name")
    pub target_param: String,
    /// The search value (e.g. "Doe")
    pub value: String,
    /// Inferred type of the target parameter
    pub target_param_type: SearchParamType,
}

/// A reverse-chained `_has` parameter: `_has:Observation:subject:code=12345`
///
/// Means: find resources referenced by `ref_field` on `target_type`
/// resources matching `param_name=param_value`, exactly one hop.
#[derive(Debug, Clone)]
pub struct HasParameter {
    pub target_type: String,
    pub ref_field: String,
    pub param_name: String,
    pub param_value: String,
}

/// _summary parameter modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryMode {
    True,
    False,
    Text,
    Count,
    Data,
}

/// A single search parameter
#[derive(Debug, Clone)]
pub struct SearchParameter {
    pub name: String,
    pub value: String,
    pub modifier: Option<String>,
    /// For date searches: eq, ne, gt, lt, ge, le, sa, eb, ap
    pub prefix: Option<String>,
    pub param_type: SearchParamType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchParamType {
    Token,     // identifier, code
    String,    // name, family
    Date,      // birthdate, date
    Reference, // subject, patient
    Number,    // _count, _offset
    Quantity,  // value-quantity
    Uri,       // url, source
    Composite, // component-code-value-quantity
    Special,   // near, _text
}

/// All recognized date search prefixes, per FHIR R4 search (longest first
/// so "sa"/"eb"/"ap" are never swallowed by a shorter match).
const DATE_PREFIXES: &[&str] = &["eq", "ne", "gt", "lt", "ge", "le", "sa", "eb", "ap"];

impl SearchQuery {
    /// Parse search query from URL query string
    pub fn parse(query_string: &str) -> Result<Self, String> {
        let mut parameters = Vec::new();
        let mut chain_parameters = Vec::new();
        let mut has_parameters = Vec::new();
        let mut include = Vec::new();
        let mut revinclude = Vec::new();
        let mut count = None;
        let mut offset = None;
        let mut summary = None;
        let mut elements = Vec::new();

        if query_string.is_empty() {
            return Ok(Self {
                parameters,
                chain_parameters,
                has_parameters,
                include,
                revinclude,
                count,
                offset,
                summary,
                elements,
            });
        }

        // Parse query parameters
        for pair in query_string.split('&') {
            let parts: Vec<&str> = pair.splitn(2, '=').collect();
            if parts.len() != 2 {
                continue;
            }

            let key = urlencoding::decode(parts[0]).map_err(|e| e.to_string())?;
            let value = urlencoding::decode(parts[1]).map_err(|e| e.to_string())?;

            // Handle special parameters
            if key == "_include" {
                include.push(value.to_string());
                continue;
            }

            if key == "_revinclude" {
                revinclude.push(value.to_string());
                continue;
            }

            if key == "_count" {
                count = value.parse().ok();
                continue;
            }

            if key == "_offset" {
                offset = value.parse().ok();
                continue;
            }

            if key == "_summary" {
                summary = match value.as_ref() {
                    "true" => Some(SummaryMode::True),
                    "false" => Some(SummaryMode::False),
                    "text" => Some(SummaryMode::Text),
                    "count" => Some(SummaryMode::Count),
                    "data" => Some(SummaryMode::Data),
                    _ => None,
                };
                continue;
            }

            if key == "_elements" {
                elements = value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                continue;
            }

            // `_has:<TargetType>:<refField>:<param>=<value>` reverse chaining.
            // The key is already URL-decoded above; the param name/value inside
            // are re-decoded implicitly since they came from the decoded key/value.
            if let Some(rest) = key.strip_prefix("_has:") {
                let segs: Vec<&str> = rest.splitn(3, ':').collect();
                if segs.len() == 3 && !segs[0].is_empty() && !segs[1].is_empty() && !segs[2].is_empty() {
                    has_parameters.push(HasParameter {
                        target_type: segs[0].to_string(),
                        ref_field: segs[1].to_string(),
                        param_name: segs[2].to_string(),
                        param_value: value.to_string(),
                    });
                    continue;
                }
            }

            // Parse parameter name and modifier
            let (param_name, modifier) = if let Some(idx) = key.find(':') {
                let (name, mod_part) = key.split_at(idx);
                (name.to_string(), Some(mod_part[1..].to_string()))
            } else {
                (key.to_string(), None)
            };

            // Detect chain search: modifier contains "." (e.g. "Patient.name")
            if let Some(ref mod_str) = modifier
                && let Some(dot_idx) = mod_str.find('.')
            {
                let target_type = mod_str[..dot_idx].to_string();
                let target_param = mod_str[dot_idx + 1..].to_string();
                if !target_type.is_empty() && !target_param.is_empty() {
                    let target_param_type = infer_param_type(&target_param);
                    chain_parameters.push(ChainParameter {
                        reference_param: param_name,
                        target_type,
                        target_param: target_param.clone(),
                        value: value.to_string(),
                        target_param_type,
                    });
                    continue;
                }
            }

            // Infer parameter type from name
            let param_type = infer_param_type(&param_name);

            // Parse the eq/ne/gt/lt/ge/le/sa/eb/ap prefix, shared by date,
            // number and quantity values.
            let (prefix, actual_value) = match param_type {
                SearchParamType::Date | SearchParamType::Number | SearchParamType::Quantity => {
                    parse_date_prefix(&value)
                }
                _ => (None, value.to_string()),
            };

            parameters.push(SearchParameter {
                name: param_name,
                value: actual_value,
                modifier,
                prefix,
                param_type,
            });
        }

        Ok(Self {
            parameters,
            chain_parameters,
            has_parameters,
            include,
            revinclude,
            count,
            offset,
            summary,
            elements,
        })
    }

    /// Get all parameters with a specific name
    pub fn get_params(&self, name: &str) -> Vec<&SearchParameter> {
        self.parameters.iter().filter(|p| p.name == name).collect()
    }
}

/// Parse date prefix from value (ge2020-01-01 -> (Some("ge"), "2020-01-01")).
/// A bare value with no recognized prefix defaults to "eq".
pub fn parse_date_prefix(value: &str) -> (Option<String>, String) {
    for prefix in DATE_PREFIXES {
        if let Some(rest) = value.strip_prefix(prefix)
            && rest.chars().next().is_none_or(|c| c.is_ascii_digit())
        {
            return (Some(prefix.to_string()), rest.to_string());
        }
    }
    (Some("eq".to_string()), value.to_string())
}

/// Infer search parameter type from parameter name (backward-compatible, no resource context)
fn infer_param_type(name: &str) -> SearchParamType {
    infer_param_type_for_resource(None, name)
}

/// Infer search parameter type, optionally using resource-specific registry definitions.
/// Falls back to name-based heuristics if no registry match is found.
pub fn infer_param_type_for_resource(resource_type: Option<&str>, name: &str) -> SearchParamType {
    use crate::search_param_registry::SearchParamRegistry;

    static DEFAULT_REGISTRY: std::sync::LazyLock<SearchParamRegistry> =
        std::sync::LazyLock::new(SearchParamRegistry::new);

    // Try registry lookup if resource_type is provided
    if let Some(rt) = resource_type
        && let Some(pt) = DEFAULT_REGISTRY.lookup_param_type(rt, name)
    {
        return pt;
    }

    // Fallback: name-based heuristics
    match name {
        "identifier" | "code" | "status" | "gender" | "intent"
        | "vaccine-code" | "clinical-status" | "type" | "category"
        | "priority" | "requisition" => SearchParamType::Token,
        "name" | "family" | "given" | "address" => SearchParamType::String,
        "birthdate" | "date" | "period" => SearchParamType::Date,
        "subject" | "patient" | "encounter" | "owner"
        | "requester" => SearchParamType::Reference,
        "value-quantity" => SearchParamType::Quantity,
        "url" | "source" => SearchParamType::Uri,
        _ => SearchParamType::String,
    }
}
