//! Credential providers for the persistent session
//!
//! The session asks for the current bearer token once per connect attempt and
//! asks for a renewal when the server rejects it. An absent token means the
//! connection is attempted unauthenticated.

use crate::config::RelayConfig;
use crate::endpoint::TargetDescriptor;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Credential renewal failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No renewable credential is configured")]
    NotRenewable,
    #[error("Login rejected by server (HTTP {0})")]
    Rejected(u16),
    #[error("Login request failed: {0}")]
    Request(String),
    #[error("Login response did not contain a token")]
    MissingToken,
}

/// Source of bearer tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Token to attach to the next connection, if any
    async fn current_token(&self) -> Option<String>;

    /// Obtain a fresh token without user interaction
    async fn renew_token(&self) -> Result<String, CredentialError>;
}

/// No credentials at all; connections are unauthenticated
#[derive(Debug, Default, Clone)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn current_token(&self) -> Option<String> {
        None
    }

    async fn renew_token(&self) -> Result<String, CredentialError> {
        Err(CredentialError::NotRenewable)
    }
}

/// A fixed, pre-issued token that cannot be renewed
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn current_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    async fn renew_token(&self) -> Result<String, CredentialError> {
        Err(CredentialError::NotRenewable)
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// Renews tokens by logging in to the server's login endpoint
pub struct LoginTokenProvider {
    client: Client,
    login_url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl LoginTokenProvider {
    pub fn new(
        login_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        initial_token: Option<String>,
    ) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        Ok(Self {
            client,
            login_url: login_url.into(),
            username: username.into(),
            password: password.into(),
            token: RwLock::new(initial_token),
        })
    }
}

#[async_trait]
impl CredentialProvider for LoginTokenProvider {
    async fn current_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn renew_token(&self) -> Result<String, CredentialError> {
        let response = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %self.login_url, "Login rejected");
            return Err(CredentialError::Rejected(status.as_u16()));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;
        let token = body
            .token
            .filter(|t| !t.is_empty())
            .ok_or(CredentialError::MissingToken)?;

        *self.token.write().await = Some(token.clone());
        info!(url = %self.login_url, "Obtained fresh bearer token");
        Ok(token)
    }
}

/// Pick the credential provider implied by the configuration
///
/// Login credentials win over a static token because only they can renew.
pub fn from_config(
    config: &RelayConfig,
    target: &TargetDescriptor,
) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    let token = config.get_token();

    if let Some((username, password)) = config.get_login() {
        let provider = LoginTokenProvider::new(target.login_url(), username, password, token)?;
        return Ok(Arc::new(provider));
    }

    Ok(match token {
        Some(token) => Arc::new(StaticTokenProvider::new(token)),
        None => Arc::new(NoCredentials),
    })
}
