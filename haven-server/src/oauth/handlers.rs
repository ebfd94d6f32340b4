//! HTTP handlers for the OAuth 2.0 / SMART-on-FHIR authorization server.
//! OAuth errors follow RFC 6749 shape (`{"error": ..., "error_description": ...}`),
//! distinct from the `OperationOutcome` shape used by the FHIR REST API.

use axum::{
    extract::{Form, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::clients::ClientRegistry;
use super::model::{parse_scope_param, verify_pkce_s256, AuthorizationRequest, AuthzSession, SessionState};
use super::session::{
    clear_cookie_header, session_id_from_cookie_header, set_cookie_header, PatientContextInjector,
};
use haven_store::AuthorizationRecord;

use crate::AppState;

fn oauth_error(status: StatusCode, error: &str, description: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description.into() })),
    )
        .into_response()
}

fn redirect_with(location: String) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, HeaderValue::from_str(&location).unwrap())],
    )
        .into_response()
}

fn append_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    let mut first = !base.contains('?');
    for (key, value) in pairs {
        url.push(if first { '?' } else { '&' });
        first = false;
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

fn html_with_cookie(body: String, cookie: Option<String>) -> Response {
    let mut response = Html(body).into_response();
    if let Some(cookie) = cookie
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

fn redirect_with_cookie(location: String, cookie: Option<String>) -> Response {
    let mut response = redirect_with(location);
    if let Some(cookie) = cookie
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok());
    session_id_from_cookie_header(cookie_header)
}

// --- GET /oauth2/authorize --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub launch: Option<String>,
    pub aud: Option<String>,
}

pub async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let oauth = &state.oauth;

    // Resume an in-flight attempt if the cookie names a live session —
    // design decision 1: the login-success (and picker-success) handlers
    // redirect back here so this trampoline, not the form handlers, owns
    // consent-state transitions.
    if let Some(id) = session_id(&headers)
        && let Some(session) = oauth.sessions.get(&id).await
        && !session.state.is_terminal()
    {
        return dispatch_session(&state, &id, &session).await;
    }

    // Fresh authorization request: validate client + redirect_uri before
    // trusting anything else (an unknown client or redirect must not be
    // used as an open redirector).
    let Some(client_id) = query.client_id.as_deref() else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing client_id");
    };
    let Some(redirect_uri) = query.redirect_uri.as_deref() else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing redirect_uri");
    };

    let registry = ClientRegistry::new(&oauth.store, &state.config);
    let Some(client) = registry.get(client_id) else {
        return oauth_error(StatusCode::BAD_REQUEST, "unauthorized_client", "unknown client_id");
    };
    if !registry.redirect_uri_allowed(&client, redirect_uri) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "redirect_uri not registered for client");
    }

    if query.response_type.as_deref() != Some("code") {
        let location = append_query(
            redirect_uri,
            &[("error", "unsupported_response_type"), ("state", query.state.as_deref().unwrap_or(""))],
        );
        return redirect_with(location);
    }

    if client.pkce_required && query.code_challenge.is_none() {
        let location = append_query(
            redirect_uri,
            &[("error", "invalid_request"), ("state", query.state.as_deref().unwrap_or(""))],
        );
        return redirect_with(location);
    }

    let request = AuthorizationRequest {
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        scope: parse_scope_param(&query.scope),
        state: query.state.clone(),
        code_challenge: query.code_challenge.clone(),
        code_challenge_method: query.code_challenge_method.clone(),
        launch: query.launch.clone(),
        aud: query.aud.clone(),
    };

    let id = oauth.sessions.create(AuthzSession::new(request)).await;
    redirect_with_cookie("/oauth2/login".to_string(), Some(set_cookie_header(&id)))
}

async fn dispatch_session(state: &Arc<AppState>, id: &str, session: &AuthzSession) -> Response {
    let oauth = &state.oauth;
    match session.state {
        SessionState::AuthRequested => redirect_with("/oauth2/login".to_string()),
        SessionState::Authenticated => {
            let needs_picker = session.request.wants_launch_patient()
                && session.patient_id.is_none()
                && is_practitioner(state, session.username.as_deref());
            if needs_picker {
                redirect_with("/patient-picker".to_string())
            } else {
                oauth.sessions.update(id, |s| s.state = SessionState::ConsentPending).await;
                redirect_with("/consent".to_string())
            }
        }
        SessionState::PatientPicked => {
            oauth.sessions.update(id, |s| s.state = SessionState::ConsentPending).await;
            redirect_with("/consent".to_string())
        }
        SessionState::ConsentPending => redirect_with("/consent".to_string()),
        SessionState::ConsentGranted | SessionState::CodeIssued => {
            let location = append_query(
                &session.request.redirect_uri,
                &[("error", "invalid_request"), ("state", session.request.state.as_deref().unwrap_or(""))],
            );
            redirect_with(location)
        }
        SessionState::Denied | SessionState::Cancelled | SessionState::Error => {
            let location = append_query(
                &session.request.redirect_uri,
                &[("error", "access_denied"), ("state", session.request.state.as_deref().unwrap_or(""))],
            );
            redirect_with(location)
        }
        SessionState::TokenIssued => oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "attempt already completed"),
    }
}

fn is_practitioner(state: &Arc<AppState>, username: Option<&str>) -> bool {
    let Some(username) = username else { return false };
    matches!(
        state.oauth.store.get_user(username),
        Ok(Some(user)) if user.role == "practitioner"
    )
}

// --- GET/POST /oauth2/login -------------------------------------------------

pub async fn login_get(headers: HeaderMap) -> Response {
    if session_id(&headers).is_none() {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no authorization attempt in progress");
    }
    Html(super::pages::login_page(None)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(id) = session_id(&headers) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no authorization attempt in progress");
    };

    let authenticated = match state.oauth.store.get_user(&form.username) {
        Ok(Some(user)) if user.status == "active" => user
            .password_hash
            .as_deref()
            .is_some_and(|hash| hash == hash_password(&form.password)),
        _ => false,
    };

    if !authenticated {
        return Html(super::pages::login_page(Some("Invalid username or password"))).into_response();
    }

    state
        .oauth
        .sessions
        .update(&id, |s| {
            s.state = SessionState::Authenticated;
            s.username = Some(form.username.clone());
        })
        .await;

    redirect_with("/oauth2/authorize".to_string())
}

/// Simplified credential hash: this deployment has no password-hashing
/// crate in its dependency stack, so a salted SHA-256 digest stands in.
pub fn hash_password(password: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"haven-oauth-v1:");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

// --- GET/POST /patient-picker ------------------------------------------------

pub async fn picker_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no authorization attempt in progress");
    };
    let Some(session) = state.oauth.sessions.get(&id).await else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "authorization attempt expired");
    };
    if session.state != SessionState::Authenticated {
        return redirect_with("/oauth2/authorize".to_string());
    }

    let patients = state
        .store
        .list_all(Some("Patient"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(_, patient_id, data)| {
            serde_json::from_slice::<Value>(&data)
                .ok()
                .map(|resource| (patient_id, patient_display_name(&resource)))
        })
        .collect::<Vec<_>>();

    Html(super::pages::patient_picker_page(&patients)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PickerForm {
    pub patient_id: Option<String>,
    #[serde(default)]
    pub action: String,
}

pub async fn picker_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<PickerForm>,
) -> Response {
    let Some(id) = session_id(&headers) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no authorization attempt in progress");
    };
    let Some(session) = state.oauth.sessions.get(&id).await else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "authorization attempt expired");
    };

    if form.action == "cancel" {
        state.oauth.sessions.update(&id, |s| s.state = SessionState::Cancelled).await;
        let location = append_query(
            &session.request.redirect_uri,
            &[("error", "access_denied"), ("state", session.request.state.as_deref().unwrap_or(""))],
        );
        return redirect_with(location);
    }

    let Some(patient_id) = form.patient_id else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing patient_id");
    };

    state
        .oauth
        .sessions
        .update(&id, |s| {
            s.patient_id = Some(patient_id.clone());
            s.state = SessionState::PatientPicked;
        })
        .await;

    redirect_with("/oauth2/authorize".to_string())
}

fn patient_display_name(resource: &Value) -> String {
    let id = resource.get("id").and_then(Value::as_str).unwrap_or("unknown");
    let name = resource
        .get("name")
        .and_then(Value::as_array)
        .and_then(|names| names.first());

    let Some(name) = name else { return id.to_string() };

    let family = name.get("family").and_then(Value::as_str);
    let given = name
        .get("given")
        .and_then(Value::as_array)
        .and_then(|g| g.first())
        .and_then(Value::as_str);

    match (given, family) {
        (Some(g), Some(f)) => format!("{g} {f} ({id})"),
        (None, Some(f)) => format!("{f} ({id})"),
        _ => id.to_string(),
    }
}

// --- GET/POST /consent -------------------------------------------------------

pub async fn consent_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no authorization attempt in progress");
    };
    let Some(session) = state.oauth.sessions.get(&id).await else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "authorization attempt expired");
    };
    if session.state != SessionState::ConsentPending {
        return redirect_with("/oauth2/authorize".to_string());
    }

    Html(super::pages::consent_page(&session.request.client_id, &session.request.scope)).into_response()
}

/// Design decision 3: this form must not carry `response_type` or
/// `code_challenge*` — their presence would make the endpoint treat the
/// POST as a new authorization request. Design decision 4: scopes arrive
/// as repeated `scope=` fields, not one space-separated value.
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    pub decision: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

pub async fn consent_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    let Some(id) = session_id(&headers) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no authorization attempt in progress");
    };
    let Some(session) = state.oauth.sessions.get(&id).await else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "authorization attempt expired");
    };
    if session.state != SessionState::ConsentPending {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "no consent pending");
    }

    if form.decision != "allow" {
        state.oauth.sessions.update(&id, |s| s.state = SessionState::Denied).await;
        state.oauth.sessions.remove(&id).await;
        let location = append_query(
            &session.request.redirect_uri,
            &[("error", "access_denied"), ("state", session.request.state.as_deref().unwrap_or(""))],
        );
        return redirect_with(location);
    }

    let granted_scopes = if form.scope.is_empty() {
        session.request.scope.clone()
    } else {
        form.scope
    };

    state.oauth.sessions.update(&id, |s| s.state = SessionState::ConsentGranted).await;

    let code = uuid::Uuid::new_v4().to_string();
    let fhir_user = resolve_fhir_user(&state, session.username.as_deref());

    let mut attributes = std::collections::BTreeMap::new();
    if let Some(username) = &session.username {
        attributes.insert("sub".to_string(), username.clone());
    }
    if let Some(fhir_user) = &fhir_user {
        attributes.insert("fhir_user".to_string(), fhir_user.clone());
    }

    let record = AuthorizationRecord {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: session.request.client_id.clone(),
        grant_type: "authorization_code".to_string(),
        scopes: granted_scopes,
        state: session.request.state.clone(),
        redirect_uri: Some(session.request.redirect_uri.clone()),
        code_challenge: session.request.code_challenge.clone(),
        code_challenge_method: session.request.code_challenge_method.clone(),
        attributes,
        authorization_code: Some(code.clone()),
        access_token: None,
        refresh_token: None,
    };

    let injector = PatientContextInjector::new(&state.oauth.store);
    if let Err(e) = injector.save(record, session.patient_id.as_deref()) {
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e);
    }

    state.oauth.sessions.update(&id, |s| s.state = SessionState::CodeIssued).await;
    state.oauth.sessions.remove(&id).await;

    let location = append_query(
        &session.request.redirect_uri,
        &[("code", &code), ("state", session.request.state.as_deref().unwrap_or(""))],
    );
    redirect_with_cookie(location, Some(clear_cookie_header()))
}

fn resolve_fhir_user(state: &Arc<AppState>, username: Option<&str>) -> Option<String> {
    let username = username?;
    match state.oauth.store.get_user(username) {
        Ok(Some(user)) => user.fhir_user.or_else(|| {
            let role = capitalize(&user.role);
            Some(format!("{role}/{username}"))
        }),
        _ => None,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// --- POST /oauth2/token ------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    iss: String,
    aud: String,
    exp: i64,
    iat: i64,
    scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    patient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "fhirUser")]
    fhir_user: Option<String>,
}

fn client_credentials_from_request(headers: &HeaderMap, form: &TokenRequest) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some(encoded) = auth.strip_prefix("Basic ")
        && let Ok(decoded) = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.decode(encoded.trim())
        }
        && let Ok(decoded) = String::from_utf8(decoded)
        && let Some((id, secret)) = decoded.split_once(':')
    {
        return (Some(id.to_string()), Some(secret.to_string()));
    }
    (form.client_id.clone(), form.client_secret.clone())
}

pub async fn token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenRequest>,
) -> Response {
    let oauth = &state.oauth;
    let (client_id, client_secret) = client_credentials_from_request(&headers, &form);

    let Some(client_id) = client_id else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", "missing client_id");
    };

    let registry = ClientRegistry::new(&oauth.store, &state.config);
    let Some(client) = registry.get(&client_id) else {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", "unknown client");
    };

    if let Some(expected) = &client.secret_hash
        && client_secret.as_deref() != Some(expected.as_str())
    {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", "client authentication failed");
    }

    if !client.grant_types.iter().any(|g| g == &form.grant_type) {
        return oauth_error(StatusCode::BAD_REQUEST, "unauthorized_client", "grant type not permitted for this client");
    }

    match form.grant_type.as_str() {
        "authorization_code" => issue_from_code(&state, &client_id, &client, &form).await,
        "refresh_token" => issue_from_refresh(&state, &client_id, &form).await,
        "client_credentials" => issue_client_credentials(&state, &client_id, &client).await,
        other => oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", other.to_string()),
    }
}

async fn issue_from_code(
    state: &Arc<AppState>,
    client_id: &str,
    client: &haven_store::RegisteredClient,
    form: &TokenRequest,
) -> Response {
    let Some(code) = &form.code else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing code");
    };

    let Ok(Some(record)) = state.oauth.store.get_authorization_by_code(code) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "unknown or already-used code");
    };

    if record.client_id != client_id {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code was not issued to this client");
    }
    if let Some(expected) = &record.redirect_uri
        && form.redirect_uri.as_ref().is_some_and(|r| r != expected)
    {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "redirect_uri mismatch");
    }

    if let Some(challenge) = &record.code_challenge {
        let Some(verifier) = &form.code_verifier else {
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing code_verifier");
        };
        if !verify_pkce_s256(verifier, challenge) {
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code_verifier does not match");
        }
    }

    let patient = record.attribute("patient_id").map(str::to_string);
    let fhir_user = record.attribute("fhir_user").map(str::to_string);
    let sub = record.attribute("sub").unwrap_or(client_id).to_string();

    let refresh_token = (state.config.smart.allow_refresh_tokens
        && client.grant_types.iter().any(|g| g == "refresh_token"))
    .then(|| uuid::Uuid::new_v4().to_string());

    let access_token = match mint_access_token(state, &sub, client_id, &record.scopes, patient.as_deref(), fhir_user.as_deref()) {
        Ok(t) => t,
        Err(e) => return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e),
    };

    let mut updated = record.clone();
    updated.authorization_code = None;
    updated.access_token = Some(access_token.clone());
    updated.refresh_token = refresh_token.clone();
    if let Err(e) = state.oauth.store.save_authorization(&updated) {
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e.to_string());
    }

    let id_token = record
        .scopes
        .iter()
        .any(|s| s == "openid")
        .then(|| mint_access_token(state, &sub, client_id, &record.scopes, patient.as_deref(), fhir_user.as_deref()).ok())
        .flatten();

    token_response(state, access_token, refresh_token, &record.scopes, patient, fhir_user, id_token)
}

async fn issue_from_refresh(state: &Arc<AppState>, client_id: &str, form: &TokenRequest) -> Response {
    let Some(refresh_token) = &form.refresh_token else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "missing refresh_token");
    };

    let Ok(Some(record)) = state.oauth.store.get_authorization_by_refresh_token(refresh_token) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "unknown refresh token");
    };
    if record.client_id != client_id {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "refresh token was not issued to this client");
    }

    let patient = record.attribute("patient_id").map(str::to_string);
    let fhir_user = record.attribute("fhir_user").map(str::to_string);
    let sub = record.attribute("sub").unwrap_or(client_id).to_string();

    let access_token = match mint_access_token(state, &sub, client_id, &record.scopes, patient.as_deref(), fhir_user.as_deref()) {
        Ok(t) => t,
        Err(e) => return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e),
    };

    let mut updated = record.clone();
    updated.access_token = Some(access_token.clone());
    if let Err(e) = state.oauth.store.save_authorization(&updated) {
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e.to_string());
    }

    token_response(state, access_token, Some(refresh_token.clone()), &record.scopes, patient, fhir_user, None)
}

async fn issue_client_credentials(state: &Arc<AppState>, client_id: &str, client: &haven_store::RegisteredClient) -> Response {
    let access_token = match mint_access_token(state, client_id, client_id, &client.scopes, None, None) {
        Ok(t) => t,
        Err(e) => return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e),
    };

    let record = AuthorizationRecord {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client_id.to_string(),
        grant_type: "client_credentials".to_string(),
        scopes: client.scopes.clone(),
        state: None,
        redirect_uri: None,
        code_challenge: None,
        code_challenge_method: None,
        attributes: Default::default(),
        authorization_code: None,
        access_token: Some(access_token.clone()),
        refresh_token: None,
    };
    if let Err(e) = state.oauth.store.save_authorization(&record) {
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e.to_string());
    }

    token_response(state, access_token, None, &client.scopes, None, None, None)
}

fn mint_access_token(
    state: &Arc<AppState>,
    sub: &str,
    client_id: &str,
    scopes: &[String],
    patient: Option<&str>,
    fhir_user: Option<&str>,
) -> Result<String, String> {
    let now = chrono::Utc::now().timestamp();
    let ttl = (state.config.smart.token_expiry_hours as i64) * 3600;

    let claims = TokenClaims {
        sub: sub.to_string(),
        iss: state.config.smart.issuer(),
        aud: client_id.to_string(),
        exp: now + ttl,
        iat: now,
        scope: scopes.join(" "),
        patient: patient.map(str::to_string),
        fhir_user: fhir_user.map(str::to_string),
    };

    let mut header = jsonwebtoken::Header::new(Algorithm::RS256);
    header.kid = Some(state.oauth.signing_key.kid.clone());

    jsonwebtoken::encode(&header, &claims, &state.oauth.signing_key.encoding_key)
        .map_err(|e| format!("failed to mint token: {e}"))
}

#[allow(clippy::too_many_arguments)]
fn token_response(
    state: &Arc<AppState>,
    access_token: String,
    refresh_token: Option<String>,
    scopes: &[String],
    patient: Option<String>,
    fhir_user: Option<String>,
    id_token: Option<String>,
) -> Response {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": state.config.smart.token_expiry_hours * 3600,
        "scope": scopes.join(" "),
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    if let Some(patient) = patient {
        body["patient"] = json!(patient);
    }
    if let Some(fhir_user) = fhir_user {
        body["fhirUser"] = json!(fhir_user);
    }
    if let Some(id_token) = id_token {
        body["id_token"] = json!(id_token);
    }
    (StatusCode::OK, Json(body)).into_response()
}

// --- GET /oauth2/jwks ---------------------------------------------------------

pub async fn jwks(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.oauth.signing_key.jwk_set())
}

// --- POST /oauth2/introspect ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

pub async fn introspect(State(state): State<Arc<AppState>>, Form(form): Form<IntrospectRequest>) -> Json<Value> {
    let record = state
        .oauth
        .store
        .get_authorization_by_access_token(&form.token)
        .ok()
        .flatten()
        .or_else(|| {
            state
                .oauth
                .store
                .get_authorization_by_refresh_token(&form.token)
                .ok()
                .flatten()
        });

    let Some(record) = record else {
        return Json(json!({ "active": false }));
    };

    Json(json!({
        "active": true,
        "client_id": record.client_id,
        "scope": record.scopes.join(" "),
        "sub": record.attribute("sub"),
        "patient": record.attribute("patient_id"),
    }))
}

// --- POST /oauth2/revoke --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

pub async fn revoke(State(state): State<Arc<AppState>>, Form(form): Form<RevokeRequest>) -> StatusCode {
    let record = state
        .oauth
        .store
        .get_authorization_by_access_token(&form.token)
        .ok()
        .flatten()
        .or_else(|| {
            state
                .oauth
                .store
                .get_authorization_by_refresh_token(&form.token)
                .ok()
                .flatten()
        });

    if let Some(record) = record {
        let _ = state.oauth.store.revoke_authorization(&record.id);
    }
    // RFC 7009: always 200 regardless of whether the token was found.
    StatusCode::OK
}

// --- GET /oauth2/userinfo -------------------------------------------------------

pub async fn userinfo(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_token", "missing bearer token");
    };

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;

    let decoded = jsonwebtoken::decode::<TokenClaims>(token, &state.oauth.signing_key.decoding_key, &validation);
    match decoded {
        Ok(data) => Json(json!({
            "sub": data.claims.sub,
            "patient": data.claims.patient,
            "fhirUser": data.claims.fhir_user,
        }))
        .into_response(),
        Err(e) => oauth_error(StatusCode::UNAUTHORIZED, "invalid_token", e.to_string()),
    }
}
