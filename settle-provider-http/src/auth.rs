//! Authentication tokens
//!
//! A [`TokenSource`] knows how to obtain a token; the [`TokenCache`] keeps
//! issued tokens until they expire or the server rejects them. The cache is
//! an explicit object shared by `Arc`, so tests and separate providers never
//! see each other's tokens.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::PasswordAuth;

/// Header carrying the token on API requests
pub const AUTH_HEADER: &str = "X-Auth-Token";
/// Header carrying the issued token on identity responses
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token request failed: {0}")]
    Request(String),

    #[error("Token request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Token response has no X-Subject-Token header")]
    MissingToken,
}

/// Something that can issue an authentication token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Key identifying the credentials in the cache
    fn cache_key(&self) -> String;

    /// Obtain a fresh token
    async fn fetch_token(&self) -> Result<String, AuthError>;
}

/// A token configured up front
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    fn cache_key(&self) -> String {
        "static".to_string()
    }

    async fn fetch_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

/// Exchanges a username and password for a project-scoped token
pub struct PasswordTokenSource {
    client: reqwest::Client,
    auth: PasswordAuth,
    project_id: String,
}

impl PasswordTokenSource {
    pub fn new(client: reqwest::Client, auth: PasswordAuth, project_id: impl Into<String>) -> Self {
        Self {
            client,
            auth,
            project_id: project_id.into(),
        }
    }

    fn request_body(&self) -> serde_json::Value {
        json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.auth.username,
                            "password": self.auth.password,
                            "domain": { "name": self.auth.domain }
                        }
                    }
                },
                "scope": { "project": { "id": self.project_id } }
            }
        })
    }
}

#[async_trait]
impl TokenSource for PasswordTokenSource {
    fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.auth.auth_url, self.auth.domain, self.auth.username, self.project_id
        )
    }

    async fn fetch_token(&self) -> Result<String, AuthError> {
        debug!("Requesting token for {} from {}", self.auth.username, self.auth.auth_url);
        let response = self
            .client
            .post(&self.auth.auth_url)
            .json(&self.request_body())
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(AuthError::MissingToken)
    }
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Tokens keyed by credentials, each valid for a fixed lifetime
pub struct TokenCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached token for `source`, fetching a new one when missing or expired.
    /// Concurrent callers wait for a single fetch.
    pub async fn get_or_fetch(&self, source: &dyn TokenSource) -> Result<String, AuthError> {
        let key = source.cache_key();
        let mut entries = self.entries.lock().await;
        if let Some(cached) = entries.get(&key)
            && Utc::now() < cached.expires_at
        {
            return Ok(cached.token.clone());
        }

        let token = source.fetch_token().await?;
        entries.insert(
            key,
            CachedToken {
                token: token.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        Ok(token)
    }

    /// Forget the token for `source`, e.g. after the server answered 401
    pub async fn invalidate(&self, source: &dyn TokenSource) {
        let key = source.cache_key();
        if self.entries.lock().await.remove(&key).is_some() {
            debug!("Invalidated cached token");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::hours(23))
    }
}
