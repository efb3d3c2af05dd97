//! Operation handles for asynchronous remote mutations

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::path;
use crate::resource::ResourceRef;

/// An in-flight asynchronous remote operation.
///
/// Created when a mutating call returns a job/task token instead of a final
/// result and consumed by the poller. Deliberately not `Clone`: one handle,
/// one wait.
#[derive(Debug, PartialEq, Eq)]
pub struct OperationHandle {
    /// Opaque token issued by the remote system
    pub id: String,
    /// Resource being mutated
    pub resource: ResourceRef,
    /// When the handle was received locally
    pub created_at: DateTime<Utc>,
}

impl OperationHandle {
    /// Keys under which backends commonly return operation tokens
    pub const DEFAULT_KEYS: &'static [&'static str] = &["job_id", "task_id"];

    pub fn new(id: impl Into<String>, resource: ResourceRef) -> Self {
        Self {
            id: id.into(),
            resource,
            created_at: Utc::now(),
        }
    }

    /// Extract a handle from a mutation response.
    ///
    /// The first key (a path, see [`crate::path`]) holding a non-empty string
    /// or number wins. Returns `None` when the response is a final result.
    pub fn from_response<S: AsRef<str>>(
        body: &Value,
        keys: &[S],
        resource: ResourceRef,
    ) -> Option<Self> {
        keys.iter()
            .filter_map(|key| path::search_str(body, key.as_ref()))
            .find(|id| !id.is_empty())
            .map(|id| Self::new(id, resource))
    }

    /// Time since the handle was received
    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }
}
