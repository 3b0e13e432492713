/*!
 * Access token acquisition
 *
 * A token is obtained once before orchestration starts. Failing to get one
 * is fatal for the run.
 */

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{GlobalConfig, Secrets, ACCESS_TOKEN_ENV};
use crate::error::{FetchError, Result};

const DEFAULT_SCOPE: &str = "https://api.businesscentral.dynamics.com/.default";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A token handed in from outside, e.g. through `BC_ACCESS_TOKEN`
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.0.trim().is_empty() {
            return Err(FetchError::Authentication(
                "static access token is empty".to_string(),
            ));
        }
        Ok(self.0.clone())
    }
}

/// OAuth2 client-credentials grant against the tenant's token endpoint
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl ClientCredentials {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .map_err(|e| FetchError::HttpClient(e.to_string()))?;
        Ok(Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        })
    }

    pub fn from_config(global: &GlobalConfig, secrets: &Secrets) -> Result<Self> {
        let client_id = global
            .client_id
            .clone()
            .ok_or_else(|| FetchError::MissingConfig("global.client-id".to_string()))?;
        let client_secret = secrets.client_secret.clone().ok_or_else(|| {
            FetchError::Authentication(
                "no client secret found in the secrets file or BC_CLIENT_SECRET".to_string(),
            )
        })?;
        let token_url = global.token_url.clone().unwrap_or_else(|| {
            format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                global.tenant_id
            )
        });
        let scope = global
            .scope
            .clone()
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());

        Self::new(token_url, client_id, client_secret, scope)
    }
}

#[async_trait]
impl TokenProvider for ClientCredentials {
    async fn access_token(&self) -> Result<String> {
        debug!(token_url = %self.token_url, "requesting access token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| FetchError::Authentication(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Authentication(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Authentication(format!("invalid token response: {}", e)))?;
        info!(expires_in = token.expires_in, "access token acquired");
        Ok(token.access_token)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Pick a provider: `BC_ACCESS_TOKEN` if set, otherwise client credentials
pub fn provider_from_env(
    global: &GlobalConfig,
    secrets: &Secrets,
) -> Result<Box<dyn TokenProvider>> {
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => Ok(Box::new(StaticToken::new(token))),
        _ => Ok(Box::new(ClientCredentials::from_config(global, secrets)?)),
    }
}
