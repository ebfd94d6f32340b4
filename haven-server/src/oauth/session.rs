//! In-process session store for the authorization flow, and the patient
//! context injector decorator described in spec 4.10.
//!
//! Per spec 5 (CONCURRENCY & RESOURCE MODEL): "the session store is a
//! `tokio::sync::RwLock<HashMap<...>>`" — the same discipline as
//! [`crate::auth::JwkCache`].

use crate::oauth::model::AuthzSession;
use haven_store::{AuthorizationRecord, OAuthStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cookie name carrying the opaque session id across login/picker/consent.
pub const SESSION_COOKIE: &str = "haven_session";

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, AuthzSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, session: AuthzSession) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !s.is_expired());
        sessions.insert(id.clone(), session);
        id
    }

    pub async fn get(&self, id: &str) -> Option<AuthzSession> {
        let sessions = self.sessions.read().await;
        sessions.get(id).filter(|s| !s.is_expired()).cloned()
    }

    pub async fn update(&self, id: &str, f: impl FnOnce(&mut AuthzSession)) -> Option<AuthzSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id)?;
        f(session);
        Some(session.clone())
    }

    pub async fn remove(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }
}

/// Read the `haven_session` cookie value from a raw `Cookie` header, hand
/// parsed the same way `auth.rs` hand-parses `Authorization: Basic ...`.
pub fn session_id_from_cookie_header(header: Option<&str>) -> Option<String> {
    let header = header?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

pub fn set_cookie_header(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn clear_cookie_header() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Decorator around [`OAuthStore::save_authorization`]: if a patient id was
/// picked this session, it is stamped into the record's attribute map
/// before the save — the token customizer later reads it back from the
/// persisted attribute, not from the session (the token request arrives
/// from a different client with no session cookie).
pub struct PatientContextInjector<'a> {
    store: &'a OAuthStore,
}

impl<'a> PatientContextInjector<'a> {
    pub fn new(store: &'a OAuthStore) -> Self {
        Self { store }
    }

    pub fn save(
        &self,
        mut record: AuthorizationRecord,
        patient_id: Option<&str>,
    ) -> Result<(), String> {
        if let Some(patient_id) = patient_id {
            record.set_attribute("patient_id", patient_id);
        }
        self.store
            .save_authorization(&record)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::model::{AuthorizationRequest, SessionState};

    fn sample_request() -> AuthorizationRequest {
        AuthorizationRequest {
            client_id: "smart-sample-app".to_string(),
            redirect_uri: "https://app.example.org/callback".to_string(),
            scope: vec!["launch/patient".to_string()],
            state: Some("xyz".to_string()),
            code_challenge: Some("challenge".to_string()),
            code_challenge_method: Some("S256".to_string()),
            launch: None,
            aud: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new();
        let id = store.create(AuthzSession::new(sample_request())).await;
        let session = store.get(&id).await.unwrap();
        assert_eq!(session.state, SessionState::AuthRequested);
    }

    #[tokio::test]
    async fn test_update_mutates_state() {
        let store = SessionStore::new();
        let id = store.create(AuthzSession::new(sample_request())).await;
        store
            .update(&id, |s| {
                s.state = SessionState::Authenticated;
                s.username = Some("p1".to_string());
            })
            .await
            .unwrap();

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.state, SessionState::Authenticated);
        assert_eq!(session.username.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SessionStore::new();
        let id = store.create(AuthzSession::new(sample_request())).await;
        store.remove(&id).await;
        assert!(store.get(&id).await.is_none());
    }

    #[test]
    fn test_cookie_header_roundtrip() {
        let header = set_cookie_header("abc123");
        assert!(header.starts_with("haven_session=abc123"));
        let parsed = session_id_from_cookie_header(Some("other=1; haven_session=abc123; foo=bar"));
        assert_eq!(parsed.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_patient_context_injected_when_present() {
        let store = OAuthStore::open(":memory:").unwrap();
        let injector = PatientContextInjector::new(&store);
        let record = AuthorizationRecord {
            id: "a1".to_string(),
            client_id: "smart-sample-app".to_string(),
            grant_type: "authorization_code".to_string(),
            scopes: vec!["launch/patient".to_string()],
            state: None,
            redirect_uri: None,
            code_challenge: None,
            code_challenge_method: None,
            attributes: Default::default(),
            authorization_code: Some("code".to_string()),
            access_token: None,
            refresh_token: None,
        };
        injector.save(record, Some("example")).unwrap();

        let loaded = store.get_authorization_by_id("a1").unwrap().unwrap();
        assert_eq!(loaded.attribute("patient_id"), Some("example"));
    }

    #[test]
    fn test_patient_context_absent_when_no_patient() {
        let store = OAuthStore::open(":memory:").unwrap();
        let injector = PatientContextInjector::new(&store);
        let record = AuthorizationRecord {
            id: "a2".to_string(),
            client_id: "admin-ui".to_string(),
            grant_type: "client_credentials".to_string(),
            scopes: vec!["system/*.*".to_string()],
            state: None,
            redirect_uri: None,
            code_challenge: None,
            code_challenge_method: None,
            attributes: Default::default(),
            authorization_code: None,
            access_token: Some("token".to_string()),
            refresh_token: None,
        };
        injector.save(record, None).unwrap();

        let loaded = store.get_authorization_by_id("a2").unwrap().unwrap();
        assert_eq!(loaded.attribute("patient_id"), None);
    }
}
