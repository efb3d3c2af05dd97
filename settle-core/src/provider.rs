//! Provider - Trait abstracting the remote control plane
//!
//! A ControlPlane issues single round trips against one remote API: mutate,
//! read a resource, read an operation handle, fetch one list page. Waiting,
//! classification and aggregation are layered on top by
//! [`crate::lifecycle::Reconciler`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::classify::{ErrorEnvelope, ErrorKind, NotFoundRule, RemoteError};
use crate::operation::OperationHandle;
use crate::pagination::Page;
use crate::resource::ResourceRef;
use crate::status::Observation;
use crate::waiter::WaitError;

/// Error type for lifecycle operations
#[derive(Debug)]
pub struct OperationError {
    pub message: String,
    pub resource: Option<ResourceRef>,
    pub kind: ErrorKind,
    /// The operation ran out of time; callers may retry
    pub timed_out: bool,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref resource) = self.resource {
            write!(f, "[{}] {}", resource, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource: None,
            kind: ErrorKind::Fatal,
            timed_out: false,
            cause: None,
        }
    }

    /// A classified remote error, reported with `context`
    pub fn remote(context: impl fmt::Display, envelope: ErrorEnvelope) -> Self {
        Self {
            message: format!("{}: {}", context, envelope.raw),
            kind: envelope.triaged(),
            ..Self::new(String::new())
        }
        .with_cause(envelope)
    }

    /// A wait that did not converge, reported with `context`
    pub fn from_wait(context: impl fmt::Display, err: WaitError) -> Self {
        let kind = match &err {
            WaitError::TimedOut { .. } => ErrorKind::Transient,
            WaitError::NotFound(_) => ErrorKind::NotFound,
            WaitError::Remote(envelope) => envelope.triaged(),
            WaitError::Failed { .. } | WaitError::UnexpectedState { .. } | WaitError::Cancelled => {
                ErrorKind::Fatal
            }
        };
        Self {
            message: format!("{}: {}", context, err),
            kind,
            timed_out: err.is_timeout(),
            ..Self::new(String::new())
        }
        .with_cause(err)
    }

    pub fn for_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type OperationResult<T> = Result<T, OperationError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kind of mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Delete,
    /// Named action on an existing resource (e.g. "resize", "restart")
    Action(String),
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Create => f.write_str("create"),
            Mutation::Update => f.write_str("update"),
            Mutation::Delete => f.write_str("delete"),
            Mutation::Action(name) => write!(f, "action {}", name),
        }
    }
}

/// A mutating call against one resource
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    /// Target resource; the id is empty for creates
    pub resource: ResourceRef,
    pub mutation: Mutation,
    pub body: Value,
}

impl MutationRequest {
    pub fn create(resource_type: impl Into<String>, body: Value) -> Self {
        Self {
            resource: ResourceRef::pending(resource_type),
            mutation: Mutation::Create,
            body,
        }
    }

    pub fn update(resource: ResourceRef, body: Value) -> Self {
        Self {
            resource,
            mutation: Mutation::Update,
            body,
        }
    }

    pub fn delete(resource: ResourceRef) -> Self {
        Self {
            resource,
            mutation: Mutation::Delete,
            body: Value::Null,
        }
    }

    pub fn action(resource: ResourceRef, name: impl Into<String>, body: Value) -> Self {
        Self {
            resource,
            mutation: Mutation::Action(name.into()),
            body,
        }
    }
}

/// What a mutating call returned
#[derive(Debug)]
pub enum MutationOutcome {
    /// The remote applied the mutation synchronously
    Completed { resource: ResourceRef, body: Value },
    /// The remote accepted the mutation and will finish it asynchronously
    Accepted(OperationHandle),
}

/// Remote control plane executing mutations asynchronously.
///
/// Every method is a single round trip; implementations must not retry on
/// behalf of the caller except for transport-level throttling.
pub trait ControlPlane: Send + Sync {
    /// Name of this control plane (e.g., "http")
    fn name(&self) -> &str;

    /// Issue a mutating call
    fn mutate(
        &self,
        request: &MutationRequest,
    ) -> BoxFuture<'_, Result<MutationOutcome, RemoteError>>;

    /// Read the current status of a resource
    fn read(&self, resource: &ResourceRef) -> BoxFuture<'_, Result<Observation, RemoteError>>;

    /// Read the current status of an asynchronous operation
    fn read_operation(
        &self,
        handle: &OperationHandle,
    ) -> BoxFuture<'_, Result<Observation, RemoteError>>;

    /// Fetch one page of a listing; an empty cursor requests the first page
    fn list_page(
        &self,
        resource_type: &str,
        cursor: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Page<Value>, RemoteError>>;

    /// How this control plane says a resource of `resource_type` is gone
    fn not_found_rules(&self, _resource_type: &str) -> Vec<NotFoundRule> {
        vec![NotFoundRule::not_found()]
    }
}

/// ControlPlane implementation for Box<dyn ControlPlane>
impl ControlPlane for Box<dyn ControlPlane> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn mutate(
        &self,
        request: &MutationRequest,
    ) -> BoxFuture<'_, Result<MutationOutcome, RemoteError>> {
        (**self).mutate(request)
    }

    fn read(&self, resource: &ResourceRef) -> BoxFuture<'_, Result<Observation, RemoteError>> {
        (**self).read(resource)
    }

    fn read_operation(
        &self,
        handle: &OperationHandle,
    ) -> BoxFuture<'_, Result<Observation, RemoteError>> {
        (**self).read_operation(handle)
    }

    fn list_page(
        &self,
        resource_type: &str,
        cursor: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Page<Value>, RemoteError>> {
        (**self).list_page(resource_type, cursor, limit)
    }

    fn not_found_rules(&self, resource_type: &str) -> Vec<NotFoundRule> {
        (**self).not_found_rules(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use serde_json::json;
    use std::time::Duration;

    // Mock ControlPlane for testing
    struct MockControlPlane;

    impl ControlPlane for MockControlPlane {
        fn name(&self) -> &str {
            "mock"
        }

        fn mutate(
            &self,
            request: &MutationRequest,
        ) -> BoxFuture<'_, Result<MutationOutcome, RemoteError>> {
            let resource = request.resource.clone();
            Box::pin(async move {
                Ok(MutationOutcome::Accepted(OperationHandle::new(
                    "job-1", resource,
                )))
            })
        }

        fn read(&self, _resource: &ResourceRef) -> BoxFuture<'_, Result<Observation, RemoteError>> {
            Box::pin(async { Err(RemoteError::http(404, "")) })
        }

        fn read_operation(
            &self,
            handle: &OperationHandle,
        ) -> BoxFuture<'_, Result<Observation, RemoteError>> {
            let id = handle.id.clone();
            Box::pin(async move { Ok(Observation::new("SUCCESS", json!({ "job_id": id }))) })
        }

        fn list_page(
            &self,
            _resource_type: &str,
            _cursor: &str,
            _limit: usize,
        ) -> BoxFuture<'_, Result<Page<Value>, RemoteError>> {
            Box::pin(async { Ok(Page::new(vec![], "")) })
        }
    }

    #[tokio::test]
    async fn mock_plane_through_box() {
        let plane: Box<dyn ControlPlane> = Box::new(MockControlPlane);
        assert_eq!(plane.name(), "mock");
        assert_eq!(plane.not_found_rules("anything"), vec![NotFoundRule::not_found()]);

        let outcome = plane
            .mutate(&MutationRequest::delete(ResourceRef::new("volume", "v-1")))
            .await
            .unwrap();
        let MutationOutcome::Accepted(handle) = outcome else {
            panic!("expected a handle");
        };
        assert_eq!(handle.id, "job-1");

        let job = plane.read_operation(&handle).await.unwrap();
        assert_eq!(job.status, "SUCCESS");
        assert!(plane.read(&handle.resource).await.is_err());
    }

    #[test]
    fn test_error_display_with_resource() {
        let err = OperationError::new("delete failed").for_resource(ResourceRef::new("volume", "v-1"));
        assert_eq!(err.to_string(), "[volume.v-1] delete failed");
        assert_eq!(err.kind, ErrorKind::Fatal);
    }

    #[test]
    fn test_remote_error_keeps_raw() {
        let raw = RemoteError::http(500, "internal").with_request("DELETE", "/v1/volumes/v-1");
        let envelope = classify(&raw, &NotFoundRule::not_found());
        let err = OperationError::remote("delete failed", envelope);
        assert_eq!(
            err.to_string(),
            "delete failed: DELETE /v1/volumes/v-1: HTTP 500: internal"
        );
        assert_eq!(err.kind, ErrorKind::Fatal);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_wait_timeout_is_retryable() {
        let err = OperationError::from_wait(
            "waiting for ACTIVE",
            WaitError::TimedOut {
                timeout: Duration::from_secs(600),
                last_status: Some("BUILD".to_string()),
                expected: "ACTIVE".to_string(),
            },
        );
        assert!(err.is_timeout());
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(err.to_string().contains("last status: BUILD"));
    }

    #[test]
    fn test_mutation_display() {
        assert_eq!(Mutation::Create.to_string(), "create");
        assert_eq!(Mutation::Action("resize".into()).to_string(), "action resize");
    }
}
