use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
    pub smart: SmartSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub api_keys: Vec<ApiKey>,
    pub basic_auth: Vec<BasicAuthUser>,
    pub jwt: Option<JwtSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub secret: Option<String>,
    pub public_key_file: Option<String>,
    /// JWKS endpoint URL for fetching public keys from an external IdP (e.g. Keycloak).
    /// Example: "https://keycloak.example.com/realms/myrealm/protocol/openid-connect/certs"
    pub jwk_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub resources_db: String,
    pub search_index_db: String,
    pub audit_db: String,
    pub oauth_db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

/// SMART-on-FHIR authorization server defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartSettings {
    /// Public base URL of the deployment, e.g. "https://fhir.example.org/fhir".
    /// The OAuth issuer is this value with a trailing "/fhir" stripped.
    pub app_base_url: String,
    /// Client secret for the built-in admin/system client.
    pub admin_ui_client_secret: String,
    pub token_expiry_hours: u64,
    pub pkce_required: bool,
    pub allow_refresh_tokens: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            resources_db: "resources.sqlite".to_string(),
            search_index_db: "search_index.sqlite".to_string(),
            audit_db: "audit.sqlite".to_string(),
            oauth_db: "oauth.sqlite".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for SmartSettings {
    fn default() -> Self {
        Self {
            app_base_url: "http://localhost:8080/fhir".to_string(),
            admin_ui_client_secret: "change-me".to_string(),
            token_expiry_hours: 1,
            pkce_required: true,
            allow_refresh_tokens: true,
        }
    }
}

impl SmartSettings {
    /// The OAuth issuer: the base URL with a trailing "/fhir" stripped.
    pub fn issuer(&self) -> String {
        self.app_base_url
            .strip_suffix("/fhir")
            .unwrap_or(&self.app_base_url)
            .trim_end_matches('/')
            .to_string()
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("HAVEN_PORT")
            && let Ok(port_num) = port.parse()
        {
            config.server.port = port_num;
        }

        if let Ok(host) = std::env::var("HAVEN_HOST") {
            config.server.host = host;
        }

        if let Ok(data_dir) = std::env::var("HAVEN_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(base_url) = std::env::var("APP_BASE_URL") {
            config.smart.app_base_url = base_url;
        }

        if let Ok(secret) = std::env::var("ADMIN_UI_CLIENT_SECRET") {
            config.smart.admin_ui_client_secret = secret;
        }

        if let Ok(hours) = std::env::var("OAUTH_TOKEN_EXPIRY_HOURS")
            && let Ok(hours_num) = hours.parse()
        {
            config.smart.token_expiry_hours = hours_num;
        }

        Ok(config)
    }

    /// Get the full path to the resources database
    pub fn resources_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.resources_db)
    }

    /// Get the full path to the search index database
    pub fn search_index_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.search_index_db)
    }

    /// Get the full path to the audit database
    pub fn audit_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.audit_db)
    }

    /// Get the full path to the OAuth database (auth records, clients, signing keys, users)
    pub fn oauth_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.oauth_db)
    }
}
