//! Registered OAuth client repository: built-in clients overlaid with
//! whatever has been persisted to [`haven_store::OAuthStore`], per spec's
//! Open Question resolution "the built-in admin/system client is granted
//! `system/*.*` by default... configurable via config.yaml's client
//! registry overlay."

use crate::config::ServerConfig;
use haven_store::{OAuthStore, RegisteredClient};

/// `client_id` of the built-in confidential client used for
/// `client_credentials` (admin/system) access.
pub const ADMIN_CLIENT_ID: &str = "admin-ui";

/// `client_id` of the built-in public SMART app used to exercise the
/// authorization-code + PKCE + patient-picker flow end to end.
pub const SAMPLE_SMART_CLIENT_ID: &str = "smart-sample-app";

pub struct ClientRegistry<'a> {
    store: &'a OAuthStore,
    config: &'a ServerConfig,
}

impl<'a> ClientRegistry<'a> {
    pub fn new(store: &'a OAuthStore, config: &'a ServerConfig) -> Self {
        Self { store, config }
    }

    /// Look up a client, preferring a persisted overlay over the built-ins.
    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        if let Ok(Some(client)) = self.store.get_client(client_id) {
            return Some(client);
        }
        self.builtin(client_id)
    }

    pub fn redirect_uri_allowed(&self, client: &RegisteredClient, redirect_uri: &str) -> bool {
        client.redirect_uris.iter().any(|u| u == redirect_uri)
    }

    fn builtin(&self, client_id: &str) -> Option<RegisteredClient> {
        match client_id {
            ADMIN_CLIENT_ID => Some(RegisteredClient {
                client_id: ADMIN_CLIENT_ID.to_string(),
                secret_hash: Some(self.config.smart.admin_ui_client_secret.clone()),
                grant_types: vec!["client_credentials".to_string()],
                redirect_uris: vec![],
                scopes: vec!["system/*.*".to_string()],
                token_ttl_seconds: (self.config.smart.token_expiry_hours * 3600) as i64,
                pkce_required: false,
            }),
            SAMPLE_SMART_CLIENT_ID => Some(RegisteredClient {
                client_id: SAMPLE_SMART_CLIENT_ID.to_string(),
                secret_hash: None,
                grant_types: vec![
                    "authorization_code".to_string(),
                    "refresh_token".to_string(),
                ],
                redirect_uris: vec![
                    "https://app.example.org/callback".to_string(),
                    "http://localhost:8000/callback".to_string(),
                ],
                scopes: vec![
                    "launch/patient".to_string(),
                    "openid".to_string(),
                    "fhirUser".to_string(),
                    "patient/*.read".to_string(),
                    "patient/*.write".to_string(),
                    "user/*.read".to_string(),
                ],
                token_ttl_seconds: (self.config.smart.token_expiry_hours * 3600) as i64,
                pkce_required: self.config.smart.pkce_required,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_admin_client() {
        let store = OAuthStore::open(":memory:").unwrap();
        let config = ServerConfig::default();
        let registry = ClientRegistry::new(&store, &config);

        let client = registry.get(ADMIN_CLIENT_ID).unwrap();
        assert_eq!(client.scopes, vec!["system/*.*"]);
        assert!(!client.pkce_required);
    }

    #[test]
    fn test_persisted_overlay_wins() {
        let store = OAuthStore::open(":memory:").unwrap();
        let config = ServerConfig::default();

        store
            .upsert_client(&RegisteredClient {
                client_id: ADMIN_CLIENT_ID.to_string(),
                secret_hash: Some("overridden".to_string()),
                grant_types: vec!["client_credentials".to_string()],
                redirect_uris: vec![],
                scopes: vec!["system/Patient.read".to_string()],
                token_ttl_seconds: 60,
                pkce_required: false,
            })
            .unwrap();

        let registry = ClientRegistry::new(&store, &config);
        let client = registry.get(ADMIN_CLIENT_ID).unwrap();
        assert_eq!(client.scopes, vec!["system/Patient.read"]);
        assert_eq!(client.token_ttl_seconds, 60);
    }

    #[test]
    fn test_unknown_client_is_none() {
        let store = OAuthStore::open(":memory:").unwrap();
        let config = ServerConfig::default();
        let registry = ClientRegistry::new(&store, &config);
        assert!(registry.get("does-not-exist").is_none());
    }

    #[test]
    fn test_redirect_uri_allowed() {
        let store = OAuthStore::open(":memory:").unwrap();
        let config = ServerConfig::default();
        let registry = ClientRegistry::new(&store, &config);
        let client = registry.get(SAMPLE_SMART_CLIENT_ID).unwrap();

        assert!(registry.redirect_uri_allowed(&client, "https://app.example.org/callback"));
        assert!(!registry.redirect_uri_allowed(&client, "https://evil.example.org/callback"));
    }
}
