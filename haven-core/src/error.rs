use thiserror::Error;

use crate::operation_outcome::{IssueType, OperationOutcome};

#[derive(Error, Debug)]
pub enum HavenError {
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound {
        resource_type: String,
        id: String,
    },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A write targeted a stale `If-Match`/version, or raced another writer.
    #[error("Version conflict on {resource_type}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        resource_type: String,
        id: String,
        expected: String,
        found: String,
    },

    /// `_has`/chain/plain search parameter not defined for this resource type.
    #[error("Unknown search parameter: {0}")]
    UnknownParameter(String),

    /// Parameter value doesn't match its declared type's grammar (bad date, non-numeric, etc).
    #[error("Invalid value for parameter {param}: {message}")]
    InvalidParameterValue { param: String, message: String },

    /// Two parameters/modifiers can't be combined (e.g. conflicting date prefixes on one field).
    #[error("Unsupported parameter combination: {0}")]
    UnsupportedParameterCombination(String),

    /// No credentials presented where authentication is required.
    #[error("Authentication required")]
    Unauthenticated,

    /// Credentials presented but insufficient scope/compartment access.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// The SMART consent flow was explicitly denied or cancelled by the user.
    #[error("Consent denied")]
    ConsentDenied,

    /// An external IdP/JWKS endpoint or upstream dependency is unreachable.
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl HavenError {
    /// Map to the FHIR `IssueType` used in the resulting `OperationOutcome`.
    pub fn issue_type(&self) -> IssueType {
        match self {
            HavenError::NotFound { .. } => IssueType::NotFound,
            HavenError::Validation { .. } => IssueType::Invalid,
            HavenError::Storage(_) => IssueType::Exception,
            HavenError::InvalidJson(_) => IssueType::Structure,
            HavenError::VersionConflict { .. } => IssueType::Conflict,
            HavenError::UnknownParameter(_) => IssueType::NotSupported,
            HavenError::InvalidParameterValue { .. } => IssueType::Value,
            HavenError::UnsupportedParameterCombination(_) => IssueType::Invalid,
            HavenError::Unauthenticated => IssueType::Login,
            HavenError::Unauthorized(_) => IssueType::Forbidden,
            HavenError::ConsentDenied => IssueType::Forbidden,
            HavenError::UpstreamUnavailable(_) => IssueType::Transient,
        }
    }

    /// Render this error as an `OperationOutcome` for an HTTP response body.
    pub fn to_operation_outcome(&self) -> OperationOutcome {
        OperationOutcome::error(self.issue_type(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HavenError>;
