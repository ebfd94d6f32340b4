//! SMART-on-FHIR authorization server: OAuth 2.0 authorization-code + PKCE
//! grant, client-credentials for the admin client, and the patient-context
//! injector described in spec sections 4.9-4.10.

pub mod clients;
pub mod handlers;
pub mod keys;
pub mod model;
pub mod pages;
pub mod session;

use axum::{
    routing::{get, post},
    Router,
};
use haven_store::OAuthStore;
use keys::SigningKey;
use session::SessionStore;
use std::sync::Arc;

use crate::AppState;

/// Process-wide OAuth state: the authorization-record/client/user store,
/// the in-flight session map, and the signing key loaded once at startup.
pub struct OAuthState {
    pub store: OAuthStore,
    pub sessions: SessionStore,
    pub signing_key: SigningKey,
}

impl OAuthState {
    pub fn new(store: OAuthStore) -> Result<Self, String> {
        let signing_key = SigningKey::load_or_generate(&store)?;
        Ok(Self {
            store,
            sessions: SessionStore::new(),
            signing_key,
        })
    }
}

/// OAuth/SMART routes, mounted at the application root (spec section 6:
/// these stay outside `/fhir`, unlike the FHIR REST surface).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oauth2/authorize", get(handlers::authorize))
        .route(
            "/oauth2/login",
            get(handlers::login_get).post(handlers::login_post),
        )
        .route(
            "/patient-picker",
            get(handlers::picker_get).post(handlers::picker_post),
        )
        .route(
            "/consent",
            get(handlers::consent_get).post(handlers::consent_post),
        )
        .route("/oauth2/token", post(handlers::token))
        .route("/oauth2/introspect", post(handlers::introspect))
        .route("/oauth2/revoke", post(handlers::revoke))
        .route("/oauth2/jwks", get(handlers::jwks))
        .route("/oauth2/userinfo", get(handlers::userinfo))
        .route(
            "/.well-known/oauth-authorization-server",
            get(crate::handlers::metadata::oauth_authorization_server_metadata),
        )
        .route(
            "/.well-known/smart-configuration",
            get(crate::handlers::metadata::smart_configuration),
        )
}
