pub mod compartment;
pub mod error;
pub mod fhirpath;
pub mod operation_outcome;
pub mod profile_loader;
pub mod resource;
pub mod resource_filter;
pub mod search_param;
pub mod search_param_registry;
pub mod search_preprocessor;
pub mod validation;

pub use error::{Result, HavenError};
pub use fhirpath::{parse_expression, ParsedFhirPath};
pub use operation_outcome::{
    CodeableConcept, Coding, IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue,
};
pub use resource::{Meta, Resource};
pub use search_param::{
    infer_param_type_for_resource, ChainParameter, HasParameter, SearchParamType, SearchParameter,
    SearchQuery, SummaryMode,
};
pub use search_param_registry::{ExtractionMode, ParamSource, SearchParamDef, SearchParamRegistry};
pub use search_preprocessor::validate_query;
pub use compartment::CompartmentDef;
