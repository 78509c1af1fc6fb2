//! Google OAuth2 for the Drive store.
//!
//! Client secrets come from the `credentials.json` downloaded from the Google
//! console; the granted token is persisted to `token.json` and refreshed
//! lazily whenever a store call finds it expired.

use anyhow::{Context, Result};
use backup_engine::EngineError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_MS: i64 = 60_000;

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    web: Option<ClientSecrets>,
    installed: Option<ClientSecrets>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Token as stored on disk. `expiry_date` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl StoredToken {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_date
            .is_some_and(|expiry| now_ms + EXPIRY_MARGIN_MS >= expiry)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Merge into a stored token. Refresh responses omit the refresh token, so
    /// the previous one is carried over.
    fn into_stored(self, previous_refresh: Option<String>, now_ms: i64) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry_date: self.expires_in.map(|secs| now_ms + secs * 1000),
            scope: self.scope,
            token_type: self.token_type,
        }
    }
}

pub struct GoogleAuth {
    http: reqwest::Client,
    secrets: Option<ClientSecrets>,
    token_path: PathBuf,
    token: RwLock<Option<StoredToken>>,
}

impl GoogleAuth {
    /// Missing files are not fatal: the store just reports itself unauthorized.
    pub fn load(http: reqwest::Client, credentials_path: &Path, token_path: &Path) -> Self {
        let secrets = match read_secrets(credentials_path) {
            Ok(secrets) => Some(secrets),
            Err(e) => {
                warn!(path = %credentials_path.display(), "Google credentials unavailable: {e:#}");
                None
            }
        };
        let token = match std::fs::read_to_string(token_path) {
            Ok(raw) => match serde_json::from_str::<StoredToken>(&raw) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(path = %token_path.display(), error = %e, "Ignoring unreadable token file");
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            http,
            secrets,
            token_path: token_path.to_path_buf(),
            token: RwLock::new(token),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.secrets.is_some()
    }

    pub async fn is_authorized(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Consent URL for offline Drive access, or `None` without client secrets.
    pub fn authorization_url(&self) -> Option<String> {
        let secrets = self.secrets.as_ref()?;
        let redirect = secrets.redirect_uris.first().map(String::as_str).unwrap_or_default();
        reqwest::Url::parse_with_params(
            &secrets.auth_uri,
            &[
                ("client_id", secrets.client_id.as_str()),
                ("redirect_uri", redirect),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .ok()
        .map(|url| url.to_string())
    }

    /// Complete the consent flow with the code from the OAuth callback.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let secrets = self
            .secrets
            .as_ref()
            .context("Google credentials are not configured")?;
        let redirect = secrets.redirect_uris.first().cloned().unwrap_or_default();
        let response = self
            .request_token(
                secrets,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect.as_str()),
                ],
            )
            .await?;

        let mut guard = self.token.write().await;
        let previous = guard.as_ref().and_then(|t| t.refresh_token.clone());
        let token = response.into_stored(previous, Utc::now().timestamp_millis());
        self.persist(&token).await?;
        *guard = Some(token);
        info!(path = %self.token_path.display(), "Google token stored");
        Ok(())
    }

    /// A valid access token, refreshing it first if it has expired.
    pub async fn access_token(&self) -> std::result::Result<String, EngineError> {
        let now = Utc::now().timestamp_millis();
        {
            let guard = self.token.read().await;
            match guard.as_ref() {
                None => return Err(EngineError::Transport("Google Drive is not authorized yet".into())),
                Some(token) if !token.is_expired(now) => return Ok(token.access_token.clone()),
                Some(_) => {}
            }
        }

        let mut guard = self.token.write().await;
        // another caller may have refreshed while we waited for the write lock
        if let Some(token) = guard.as_ref() {
            if !token.is_expired(Utc::now().timestamp_millis()) {
                return Ok(token.access_token.clone());
            }
        }
        let refresh_token = guard
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or_else(|| EngineError::Transport("Google token expired and has no refresh token".into()))?;
        let secrets = self
            .secrets
            .as_ref()
            .ok_or_else(|| EngineError::Transport("Google credentials are not configured".into()))?;

        let response = self
            .request_token(
                secrets,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                ],
            )
            .await
            .map_err(|e| EngineError::Transport(format!("token refresh failed: {e:#}")))?;

        let token = response.into_stored(Some(refresh_token), Utc::now().timestamp_millis());
        if let Err(e) = self.persist(&token).await {
            warn!("Failed to persist refreshed token: {e:#}");
        }
        let access = token.access_token.clone();
        *guard = Some(token);
        info!("Google access token refreshed");
        Ok(access)
    }

    async fn request_token(&self, secrets: &ClientSecrets, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let resp = self.http.post(&secrets.token_uri).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {status}: {body}");
        }
        Ok(resp.json::<TokenResponse>().await?)
    }

    async fn persist(&self, token: &StoredToken) -> Result<()> {
        let raw = serde_json::to_string_pretty(token)?;
        tokio::fs::write(&self.token_path, raw)
            .await
            .with_context(|| format!("Failed to write {}", self.token_path.display()))?;
        Ok(())
    }
}

fn read_secrets(path: &Path) -> Result<ClientSecrets> {
    let raw = std::fs::read_to_string(path)?;
    let file: CredentialsFile = serde_json::from_str(&raw)?;
    file.web
        .or(file.installed)
        .context("credentials file has neither a \"web\" nor an \"installed\" client")
}
