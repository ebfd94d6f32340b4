//! Shared types for the authorization-code + PKCE flow: the in-flight
//! session state machine, the original authorization request, and PKCE
//! verification. See spec section 4.9 for the state diagram this mirrors.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// One step of the per-attempt state machine.
///
/// ```text
/// START -> AUTH_REQUESTED -> AUTHENTICATED
///       -> (practitioner & launch/patient) PATIENT_PICKED
///       -> CONSENT_PENDING -> CONSENT_GRANTED -> CODE_ISSUED -> TOKEN_ISSUED
///       (any step) -> DENIED | CANCELLED | ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AuthRequested,
    Authenticated,
    PatientPicked,
    ConsentPending,
    ConsentGranted,
    CodeIssued,
    TokenIssued,
    Denied,
    Cancelled,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::TokenIssued
                | SessionState::Denied
                | SessionState::Cancelled
                | SessionState::Error
        )
    }
}

/// The original `/oauth2/authorize` query, retained across login/picker/consent.
/// Design decision 5: this must not be stripped when re-read from the session.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub launch: Option<String>,
    pub aud: Option<String>,
}

impl AuthorizationRequest {
    pub fn wants_launch_patient(&self) -> bool {
        self.scope.iter().any(|s| s == "launch/patient")
    }

    pub fn wants_openid(&self) -> bool {
        self.scope.iter().any(|s| s == "openid")
    }

    pub fn scope_string(&self) -> String {
        self.scope.join(" ")
    }
}

/// A single in-flight (or just-completed) authorization attempt, keyed by
/// the opaque session cookie value.
#[derive(Debug, Clone)]
pub struct AuthzSession {
    pub state: SessionState,
    pub request: AuthorizationRequest,
    pub username: Option<String>,
    pub patient_id: Option<String>,
    pub created_at: std::time::Instant,
}

impl AuthzSession {
    pub fn new(request: AuthorizationRequest) -> Self {
        Self {
            state: SessionState::AuthRequested,
            request,
            username: None,
            patient_id: None,
            created_at: std::time::Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > std::time::Duration::from_secs(10 * 60)
    }
}

pub fn parse_scope_param(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

/// Verify a PKCE S256 `code_verifier` against the recorded `code_challenge`.
pub fn verify_pkce_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let digest = Sha256::digest(code_verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(digest);
    computed == code_challenge
}
