//! Settle HTTP Provider
//!
//! ControlPlane implementation for JSON REST APIs that answer mutations with
//! either a final result or a job/task handle.
//!
//! ## Module Structure
//!
//! - `config` - Provider configuration file and environment overrides
//! - `resources` - Resource kind registry (paths and response keys per type)
//! - `auth` - Token sources and the shared token cache
//! - `client` - HTTP client with authentication and 429 back-off
//! - `provider` - HttpControlPlane implementation
//! - `utils` - Path template expansion and segment encoding

pub mod auth;
pub mod client;
pub mod config;
pub mod provider;
pub mod resources;
pub mod utils;

// Re-export main types
pub use auth::{AuthError, PasswordTokenSource, StaticToken, TokenCache, TokenSource};
pub use client::HttpClient;
pub use config::{AuthConfig, ConfigError, ConfigResult, PasswordAuth, ProviderConfig, RetryConfig};
pub use provider::HttpControlPlane;
pub use resources::{PaginationStyle, ResourceKind, ResourceRegistry};
pub use utils::{encode_segment, expand_path, join_url, placeholders};
