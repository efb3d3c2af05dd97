//! Provider configuration
//!
//! Loaded from a JSON file, then overridden from the environment:
//!
//! ```json
//! {
//!   "endpoint": "https://vpn.example.com",
//!   "project_id": "0a1b2c",
//!   "auth": {"token": "..."},
//!   "resources": [
//!     {"name": "vpn_gateway", "collection_path": "v5/{project_id}/vpn-gateways"}
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{ResourceKind, ResourceRegistry};

/// Environment variable overriding `endpoint`
pub const ENV_ENDPOINT: &str = "SETTLE_ENDPOINT";
/// Environment variable overriding `project_id`
pub const ENV_PROJECT_ID: &str = "SETTLE_PROJECT_ID";
/// Environment variable replacing `auth` with a static token
pub const ENV_TOKEN: &str = "SETTLE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How requests are authenticated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication header
    #[default]
    None,
    /// Fixed token sent as-is
    Token(String),
    /// Exchange credentials for a token at an identity endpoint
    Password(PasswordAuth),
}

/// Credentials for the identity endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordAuth {
    /// Token issuing URL (e.g., "https://iam.example.com/v3/auth/tokens")
    pub auth_url: String,
    pub username: String,
    pub password: String,
    /// Account (domain) the user belongs to
    pub domain: String,
}

/// Back-off applied to HTTP 429 responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RetryConfig::default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "RetryConfig::default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        5
    }

    fn default_base_delay_secs() -> u64 {
        60
    }

    fn default_max_delay_secs() -> u64 {
        1800
    }

    /// Sleep before retry number `attempt` (0-based): base * 2^attempt,
    /// capped at the maximum
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_delay_secs: Self::default_base_delay_secs(),
            max_delay_secs: Self::default_max_delay_secs(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    23 * 60 * 60
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Configuration for the HTTP control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the service (e.g., "https://vpn.example.com")
    #[serde(default)]
    pub endpoint: String,
    /// Substituted for `{project_id}` in path templates
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Lifetime of an issued token before it is fetched again
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub resources: Vec<ResourceKind>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            project_id: String::new(),
            auth: AuthConfig::default(),
            token_ttl_secs: default_token_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            resources: Vec::new(),
        }
    }
}

impl ProviderConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Configuration built only from the environment
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Apply `SETTLE_*` overrides from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SETTLE_*` overrides from `lookup`; empty values are ignored
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(project_id) = lookup(ENV_PROJECT_ID) {
            self.project_id = project_id;
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.auth = AuthConfig::Token(token);
        }
        self
    }

    /// Reject configurations that cannot address any request
    pub fn validate(&self) -> ConfigResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid(format!(
                "endpoint is empty (set it in the config file or {})",
                ENV_ENDPOINT
            )));
        }
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::invalid(format!("endpoint '{}': {}", self.endpoint, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::invalid(format!(
                "endpoint '{}' must use http or https",
                self.endpoint
            )));
        }

        if let AuthConfig::Password(password) = &self.auth
            && (password.auth_url.is_empty() || password.username.is_empty())
        {
            return Err(ConfigError::invalid(
                "password auth needs auth_url and username",
            ));
        }

        let mut seen = HashSet::new();
        for kind in &self.resources {
            if !seen.insert(kind.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate resource '{}'",
                    kind.name
                )));
            }
            kind.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// Get the configured kind for a resource type
    pub fn resource(&self, name: &str) -> Option<&ResourceKind> {
        self.resources.iter().find(|k| k.name == name)
    }

    pub fn registry(&self) -> ResourceRegistry {
        ResourceRegistry::new(self.resources.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.token_ttl_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "endpoint": "https://vpn.example.com",
        "project_id": "p1",
        "resources": [
            {"name": "vpn_gateway", "collection_path": "v5/{project_id}/vpn-gateways"}
        ]
    }"#;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.auth, AuthConfig::None);
        assert_eq!(config.token_ttl_secs, 82800);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.resource("vpn_gateway").is_some());
        config.validate().unwrap();
    }

    #[test]
    fn test_auth_variants() {
        let config = ProviderConfig::from_json(r#"{"auth": {"token": "abc"}}"#).unwrap();
        assert_eq!(config.auth, AuthConfig::Token("abc".to_string()));

        let config = ProviderConfig::from_json(
            r#"{"auth": {"password": {
                "auth_url": "https://iam.example.com/v3/auth/tokens",
                "username": "ops",
                "password": "secret",
                "domain": "acme"
            }}}"#,
        )
        .unwrap();
        let AuthConfig::Password(password) = config.auth else {
            panic!("expected password auth");
        };
        assert_eq!(password.domain, "acme");
    }

    #[test]
    fn test_retry_delay() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(0), Duration::from_secs(60));
        assert_eq!(retry.delay_for(1), Duration::from_secs(120));
        assert_eq!(retry.delay_for(4), Duration::from_secs(960));
        assert_eq!(retry.delay_for(5), Duration::from_secs(1800));
        assert_eq!(retry.delay_for(80), Duration::from_secs(1800));
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            (ENV_ENDPOINT, "http://127.0.0.1:9000"),
            (ENV_TOKEN, "from-env"),
            (ENV_PROJECT_ID, ""),
        ]);
        let config = ProviderConfig::from_json(MINIMAL)
            .unwrap()
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.endpoint, "http://127.0.0.1:9000");
        assert_eq!(config.project_id, "p1");
        assert_eq!(config.auth, AuthConfig::Token("from-env".to_string()));
    }

    #[test]
    fn test_validate_errors() {
        let config = ProviderConfig::default();
        assert!(config.validate().unwrap_err().to_string().contains("endpoint is empty"));

        let config = ProviderConfig {
            endpoint: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ProviderConfig {
            endpoint: "https://example.com".to_string(),
            resources: vec![
                ResourceKind::new("volume", "v2/volumes"),
                ResourceKind::new("volume", "v3/volumes"),
            ],
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("duplicate resource"));

        let config = ProviderConfig {
            endpoint: "https://example.com".to_string(),
            resources: vec![ResourceKind::new("volume", "v2/{tenant}/volumes")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = ProviderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, "https://vpn.example.com");
        assert_eq!(config.registry().names(), vec!["vpn_gateway"]);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProviderConfig::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = ProviderConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
