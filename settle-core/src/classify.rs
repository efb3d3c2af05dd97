//! Error classification
//!
//! Backends disagree about how they say "the thing you asked about does not
//! exist": some use 404, others 400/403/409/500 with a domain error code in
//! the body. [`classify`] is the single decision point that turns such a
//! response into [`ErrorKind::NotFound`], so idempotent operations share one
//! notion of "gone".
//!
//! Classification only ever narrows. Anything that does not match the
//! caller's rule is passed through unchanged as [`ErrorKind::Unclassified`],
//! so an over-specified rule surfaces the real error instead of hiding it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::path;

/// Raw error returned by a remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// HTTP status, absent for transport-level failures
    pub status: Option<u16>,
    /// Response body as received
    pub body: String,
    /// Human readable summary (transport failures, local request errors)
    pub message: String,
    /// "METHOD url" of the failing request, when known
    pub request: Option<String>,
    /// True when the request never left this process (e.g. unknown resource type)
    pub local: bool,
}

impl RemoteError {
    /// Error response carrying an HTTP status and body
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
            message: String::new(),
            request: None,
            local: false,
        }
    }

    /// Failure before any HTTP status was received
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: String::new(),
            message: message.into(),
            request: None,
            local: false,
        }
    }

    /// Request that could not be built or routed locally
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::transport(message)
        }
    }

    pub fn with_request(mut self, method: impl fmt::Display, url: impl fmt::Display) -> Self {
        self.request = Some(format!("{} {}", method, url));
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(request) = &self.request {
            write!(f, "{}: ", request)?;
        }
        match self.status {
            Some(status) => {
                write!(f, "HTTP {}", status)?;
                if !self.body.trim().is_empty() {
                    write!(f, ": {}", self.body.trim())
                } else if !self.message.is_empty() {
                    write!(f, ": {}", self.message)
                } else {
                    Ok(())
                }
            }
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Canonical error kinds understood by every caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Remote resource is absent (or the backend's "already gone" signal)
    NotFound,
    Unauthorized,
    /// Retryable, e.g. throttling or a momentary gateway failure
    Transient,
    /// Aborts the current operation
    Fatal,
    /// No reclassification rule matched; the raw error is authoritative
    Unclassified,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Unclassified => "unclassified",
        };
        f.write_str(name)
    }
}

/// A remote error after classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {raw}")]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    /// Domain error code extracted from the body, when the rule names one
    pub domain_code: Option<String>,
    /// The unclassified error, untouched
    #[source]
    pub raw: RemoteError,
}

impl ErrorEnvelope {
    /// Wrap an error without reclassifying it
    pub fn passthrough(raw: RemoteError) -> Self {
        Self {
            kind: ErrorKind::Unclassified,
            http_status: raw.status,
            domain_code: None,
            raw,
        }
    }

    fn not_found(raw: RemoteError, domain_code: Option<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            http_status: raw.status,
            domain_code,
            raw,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// The classified kind, or the coarse [`triage`] of the raw error when
    /// no rule matched
    pub fn triaged(&self) -> ErrorKind {
        match self.kind {
            ErrorKind::Unclassified => triage(&self.raw),
            kind => kind,
        }
    }
}

/// Rule describing how one call site recognises "resource absent"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundRule {
    /// HTTP status the backend uses for "gone" at this call site
    pub expected_status: u16,
    /// Path of the domain error code in the body; empty disables code checks
    #[serde(default)]
    pub code_key: String,
    /// Codes that must match for reclassification; empty matches any code
    #[serde(default)]
    pub allowed_codes: Vec<String>,
}

impl NotFoundRule {
    /// Reclassify every error carrying `expected_status`
    pub fn status(expected_status: u16) -> Self {
        Self {
            expected_status,
            code_key: String::new(),
            allowed_codes: Vec::new(),
        }
    }

    /// The plain HTTP 404 rule
    pub fn not_found() -> Self {
        Self::status(404)
    }

    /// Reclassify only when the body carries one of `codes` at `code_key`
    pub fn with_codes<I, S>(expected_status: u16, code_key: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected_status,
            code_key: code_key.into(),
            allowed_codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for NotFoundRule {
    fn default() -> Self {
        Self::not_found()
    }
}

/// Classify `err` against one rule.
///
/// Deterministic, total and side-effect free. Returns [`ErrorKind::NotFound`]
/// or a passthrough envelope holding a copy of `err`.
pub fn classify(err: &RemoteError, rule: &NotFoundRule) -> ErrorEnvelope {
    if err.status != Some(rule.expected_status) {
        return ErrorEnvelope::passthrough(err.clone());
    }

    // An empty body is "no body", not a malformed one
    let body = if err.body.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(&err.body) {
            Ok(body) => body,
            Err(_) => return ErrorEnvelope::passthrough(err.clone()),
        }
    };

    if rule.code_key.is_empty() {
        return ErrorEnvelope::not_found(err.clone(), None);
    }

    let Some(code) = path::search_str(&body, &rule.code_key) else {
        return ErrorEnvelope::passthrough(err.clone());
    };

    if rule.allowed_codes.is_empty() || rule.allowed_codes.iter().any(|c| *c == code) {
        ErrorEnvelope::not_found(err.clone(), Some(code))
    } else {
        ErrorEnvelope {
            domain_code: Some(code),
            ..ErrorEnvelope::passthrough(err.clone())
        }
    }
}

/// Classify `err` against several rules; the first rule that reclassifies wins
pub fn classify_any(err: &RemoteError, rules: &[NotFoundRule]) -> ErrorEnvelope {
    let mut fallback: Option<ErrorEnvelope> = None;
    for rule in rules {
        let envelope = classify(err, rule);
        if envelope.is_not_found() {
            return envelope;
        }
        if fallback.is_none() && envelope.domain_code.is_some() {
            fallback = Some(envelope);
        }
    }
    fallback.unwrap_or_else(|| ErrorEnvelope::passthrough(err.clone()))
}

/// Coarse kind of a raw error, independent of any call-site rule
pub fn triage(err: &RemoteError) -> ErrorKind {
    if err.local {
        return ErrorKind::Fatal;
    }
    match err.status {
        None => ErrorKind::Transient,
        Some(401) => ErrorKind::Unauthorized,
        Some(404) => ErrorKind::NotFound,
        Some(408 | 429 | 502 | 503 | 504) => ErrorKind::Transient,
        Some(_) => ErrorKind::Fatal,
    }
}
