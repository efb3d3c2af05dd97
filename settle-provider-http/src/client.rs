//! HTTP client for JSON control-plane APIs
//!
//! Adds the auth token and a request id to every call, re-authenticates
//! once on 401 and backs off on 429. Everything else is returned to the
//! caller as a [`RemoteError`] for classification.

use std::sync::Arc;

use log::{debug, warn};
use reqwest::Method;
use serde_json::Value;
use settle_core::{Cancellation, ErrorKind, RemoteError, triage};
use uuid::Uuid;

use crate::auth::{AUTH_HEADER, PasswordTokenSource, StaticToken, TokenCache, TokenSource};
use crate::config::{AuthConfig, ConfigError, ConfigResult, ProviderConfig, RetryConfig};
use crate::utils::join_url;

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    token_source: Option<Arc<dyn TokenSource>>,
    tokens: Arc<TokenCache>,
    retry: RetryConfig,
    cancel: Cancellation,
}

impl HttpClient {
    pub fn new(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token_source: None,
            tokens: Arc::new(TokenCache::default()),
            retry: RetryConfig::default(),
            cancel: Cancellation::new(),
        }
    }

    /// Build a client for `config`, sharing `tokens` with other clients
    pub fn from_config(config: &ProviderConfig, tokens: Arc<TokenCache>) -> ConfigResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::invalid(format!("failed to build HTTP client: {}", e)))?;

        let token_source: Option<Arc<dyn TokenSource>> = match &config.auth {
            AuthConfig::None => None,
            AuthConfig::Token(token) => Some(Arc::new(StaticToken::new(token.clone()))),
            AuthConfig::Password(password) => Some(Arc::new(PasswordTokenSource::new(
                client.clone(),
                password.clone(),
                config.project_id.clone(),
            ))),
        };

        Ok(Self {
            token_source,
            tokens,
            retry: config.retry.clone(),
            ..Self::new(config.endpoint.clone(), client)
        })
    }

    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn with_token_cache(mut self, tokens: Arc<TokenCache>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Abort 429 back-off sleeps when `cancel` fires
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    async fn token(&self, method: &Method, url: &str) -> Result<Option<String>, RemoteError> {
        let Some(source) = &self.token_source else {
            return Ok(None);
        };
        self.tokens
            .get_or_fetch(source.as_ref())
            .await
            .map(Some)
            .map_err(|e| {
                RemoteError::transport(format!("authentication failed: {}", e))
                    .with_request(method, url)
            })
    }

    /// Send one logical request. A successful empty body reads as `Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let url = join_url(&self.endpoint, path);
        let mut throttled = 0u32;
        let mut reauthenticated = false;

        loop {
            let token = self.token(&method, &url).await?;
            let request_id = Uuid::new_v4().to_string();

            let mut builder = self
                .client
                .request(method.clone(), &url)
                .header(REQUEST_ID_HEADER, &request_id);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(token) = &token {
                builder = builder.header(AUTH_HEADER, token);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            debug!("{} {} (request {})", method, url, request_id);
            let response = builder
                .send()
                .await
                .map_err(|e| RemoteError::transport(e.to_string()).with_request(&method, &url))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| RemoteError::transport(e.to_string()).with_request(&method, &url))?;

            if (200..300).contains(&status) {
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text).map_err(|e| {
                    RemoteError::transport(format!("invalid JSON in HTTP {} response: {}", status, e))
                        .with_request(&method, &url)
                });
            }

            let err = RemoteError::http(status, text).with_request(&method, &url);
            match triage(&err) {
                ErrorKind::Unauthorized if !reauthenticated => {
                    let Some(source) = &self.token_source else {
                        return Err(err);
                    };
                    warn!("{} {} was rejected with 401, refreshing token", method, url);
                    self.tokens.invalidate(source.as_ref()).await;
                    reauthenticated = true;
                }
                _ if status == 429 && throttled < self.retry.max_retries => {
                    let delay = self.retry.delay_for(throttled);
                    throttled += 1;
                    warn!(
                        "Received HTTP 429 from {} {}, retrying in {}s ({}/{})",
                        method,
                        url,
                        delay.as_secs(),
                        throttled,
                        self.retry.max_retries
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                _ => return Err(err),
            }
        }
    }
}
