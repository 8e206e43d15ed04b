//! Application default credentials.
//!
//! Credentials are discovered in the usual order: the file named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud well-known file, then the
//! compute metadata server. Access tokens are cached until shortly before they expire.

use std::env;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use google_apis_common as common;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("failed to read credentials file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid credentials file {}: {reason}", .path.display())]
    InvalidFile { path: PathBuf, reason: String },

    #[error("unsupported credentials type '{0}'")]
    UnsupportedType(String),

    #[error("failed to sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default)]
    quota_project_id: Option<String>,
}

#[derive(Clone, Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default)]
    quota_project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    fn assertion(&self, scope: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let claims = Claims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }
}

enum CredentialSource {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    Metadata { host: String },
}

impl CredentialSource {
    fn kind(&self) -> &'static str {
        match self {
            CredentialSource::ServiceAccount(_) => "service_account",
            CredentialSource::AuthorizedUser(_) => "authorized_user",
            CredentialSource::Metadata { .. } => "metadata_server",
        }
    }

    fn quota_project(&self) -> Option<&str> {
        match self {
            CredentialSource::ServiceAccount(key) => key.quota_project_id.as_deref(),
            CredentialSource::AuthorizedUser(user) => user.quota_project_id.as_deref(),
            CredentialSource::Metadata { .. } => None,
        }
    }
}

fn read_credentials_file(path: &Path) -> Result<CredentialSource, AuthError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AuthError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |reason: String| AuthError::InvalidFile {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
    match value.get("type").and_then(Value::as_str) {
        Some("service_account") => serde_json::from_value(value)
            .map(CredentialSource::ServiceAccount)
            .map_err(|e| invalid(e.to_string())),
        Some("authorized_user") => serde_json::from_value(value)
            .map(CredentialSource::AuthorizedUser)
            .map_err(|e| invalid(e.to_string())),
        Some(other) => Err(AuthError::UnsupportedType(other.to_string())),
        None => Err(invalid("missing \"type\" field".to_string())),
    }
}

/// Where to look for application default credentials.
#[derive(Debug, Clone)]
pub struct CredentialsLoader {
    pub credentials_file: Option<PathBuf>,
    pub well_known_file: Option<PathBuf>,
    pub metadata_host: String,
}

impl CredentialsLoader {
    pub fn from_env() -> Self {
        Self {
            credentials_file: non_empty_var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            well_known_file: gcloud_config_dir().map(|dir| dir.join(WELL_KNOWN_FILE)),
            metadata_host: non_empty_var("GCE_METADATA_HOST")
                .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string()),
        }
    }

    /// Resolves the credential source. An explicitly configured file must be readable;
    /// a missing well-known file falls through to the metadata server.
    pub fn load(&self, http: reqwest::Client) -> Result<DefaultCredentials, AuthError> {
        let source = if let Some(path) = &self.credentials_file {
            read_credentials_file(path)?
        } else if let Some(path) = self.well_known_file.as_ref().filter(|p| p.is_file()) {
            read_credentials_file(path)?
        } else {
            CredentialSource::Metadata {
                host: self.metadata_host.clone(),
            }
        };

        info!(credentials = source.kind(), "Loaded application default credentials");
        Ok(DefaultCredentials {
            inner: Arc::new(Inner {
                source,
                http,
                cached: Mutex::new(None),
            }),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn gcloud_config_dir() -> Option<PathBuf> {
    if let Some(dir) = non_empty_var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir));
    }
    if cfg!(windows) {
        dirs::config_dir().map(|dir| dir.join("gcloud"))
    } else {
        dirs::home_dir().map(|dir| dir.join(".config").join("gcloud"))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

struct Inner {
    source: CredentialSource,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

/// Token provider for the API hub. Clones share one token cache.
#[derive(Clone)]
pub struct DefaultCredentials {
    inner: Arc<Inner>,
}

impl DefaultCredentials {
    pub fn kind(&self) -> &'static str {
        self.inner.source.kind()
    }

    pub fn quota_project(&self) -> Option<&str> {
        self.inner.source.quota_project()
    }

    pub async fn access_token(&self, scopes: &[&str]) -> Result<String, AuthError> {
        let mut cached = self.inner.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token(scopes).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self, scopes: &[&str]) -> Result<AccessToken, AuthError> {
        let scope = if scopes.is_empty() {
            CLOUD_PLATFORM_SCOPE.to_string()
        } else {
            scopes.join(" ")
        };
        let http = &self.inner.http;

        let response = match &self.inner.source {
            CredentialSource::ServiceAccount(key) => {
                let assertion = key.assertion(&scope, Utc::now())?;
                http.post(&key.token_uri)
                    .form(&[
                        ("grant_type", JWT_BEARER_GRANT),
                        ("assertion", assertion.as_str()),
                    ])
                    .send()
                    .await?
            }
            CredentialSource::AuthorizedUser(user) => {
                http.post(&user.token_uri)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", user.client_id.as_str()),
                        ("client_secret", user.client_secret.as_str()),
                        ("refresh_token", user.refresh_token.as_str()),
                    ])
                    .send()
                    .await?
            }
            CredentialSource::Metadata { host } => {
                http.get(format!(
                    "http://{host}/computeMetadata/v1/instance/service-accounts/default/token"
                ))
                .query(&[("scopes", scope.as_str())])
                .header("Metadata-Flavor", "Google")
                .send()
                .await?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        let expires_in = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        debug!(expires_in, "Refreshed access token");
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        })
    }
}

impl common::GetToken for DefaultCredentials {
    fn get_token<'a>(
        &'a self,
        scopes: &'a [&str],
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>>
                + Send
                + 'a,
        >,
    > {
        Box::pin(async move {
            let token = self.access_token(scopes).await?;
            Ok(Some(token))
        })
    }
}
