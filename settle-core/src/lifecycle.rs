//! Lifecycle - Create, read, update, delete and list on a ControlPlane
//!
//! The Reconciler issues one mutating call, hands any returned operation
//! handle to the poller, optionally waits for the resource itself to settle,
//! and classifies every error on the way out.

use log::{debug, info};
use serde_json::Value;

use crate::cancel::Cancellation;
use crate::classify::{NotFoundRule, RemoteError, classify_any};
use crate::operation::OperationHandle;
use crate::pagination::{PaginationError, Paginator};
use crate::provider::{
    ControlPlane, MutationOutcome, MutationRequest, OperationError, OperationResult,
};
use crate::resource::ResourceRef;
use crate::status::{Observation, StateSets};
use crate::waiter::{FinalState, NotFoundPolicy, WaitConfig, wait_for, wait_for_operation};

/// Per-call tuning for lifecycle operations
#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    /// "Gone" rules; empty uses the control plane's rules for the type
    pub not_found: Vec<NotFoundRule>,
    /// Wait applied to operation handles; `None` uses [`LifecycleOptions::job_wait`]
    pub operation: Option<WaitConfig>,
    /// Wait on the resource's own status after the mutation.
    /// For deletes `None` waits for absence with any status pending.
    pub resource: Option<WaitConfig>,
}

impl LifecycleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_not_found(mut self, rules: Vec<NotFoundRule>) -> Self {
        self.not_found = rules;
        self
    }

    pub fn with_operation_wait(mut self, config: WaitConfig) -> Self {
        self.operation = Some(config);
        self
    }

    pub fn with_resource_wait(mut self, config: WaitConfig) -> Self {
        self.resource = Some(config);
        self
    }

    /// Default wait for job handles: SUCCESS completes, FAIL aborts,
    /// anything else is still running
    pub fn job_wait() -> WaitConfig {
        WaitConfig::new(
            StateSets::new(Vec::<String>::new(), vec!["SUCCESS".to_string()])
                .with_failure(["FAIL", "FAILED"]),
        )
    }
}

/// Result of a successful mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub resource: ResourceRef,
    /// Body of a synchronous response; `Null` when the remote returned a handle
    pub response: Value,
    /// Handle of the asynchronous operation that was awaited
    pub operation_id: Option<String>,
    /// Final resource observation, when a resource wait was requested
    pub observation: Option<Observation>,
}

/// Drives lifecycle operations against a ControlPlane
pub struct Reconciler<P: ControlPlane> {
    plane: P,
    cancel: Cancellation,
}

/// Use the resolved rules for a wait unless the caller set its own
fn with_resolved_rules(config: WaitConfig, rules: Vec<NotFoundRule>) -> WaitConfig {
    if config.not_found_rules == WaitConfig::default().not_found_rules {
        WaitConfig {
            not_found_rules: rules,
            ..config
        }
    } else {
        config
    }
}

impl<P: ControlPlane> Reconciler<P> {
    pub fn new(plane: P) -> Self {
        Self {
            plane,
            cancel: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn plane(&self) -> &P {
        &self.plane
    }

    fn rules(&self, resource_type: &str, options: &LifecycleOptions) -> Vec<NotFoundRule> {
        if options.not_found.is_empty() {
            self.plane.not_found_rules(resource_type)
        } else {
            options.not_found.clone()
        }
    }

    fn remote_error(
        &self,
        context: String,
        err: &RemoteError,
        rules: &[NotFoundRule],
        resource: &ResourceRef,
    ) -> OperationError {
        OperationError::remote(context, classify_any(err, rules)).for_resource(resource.clone())
    }

    pub async fn create(
        &self,
        resource_type: &str,
        body: Value,
        options: &LifecycleOptions,
    ) -> OperationResult<Applied> {
        self.apply(MutationRequest::create(resource_type, body), options)
            .await
    }

    pub async fn update(
        &self,
        resource: ResourceRef,
        body: Value,
        options: &LifecycleOptions,
    ) -> OperationResult<Applied> {
        self.apply(MutationRequest::update(resource, body), options)
            .await
    }

    pub async fn action(
        &self,
        resource: ResourceRef,
        name: &str,
        body: Value,
        options: &LifecycleOptions,
    ) -> OperationResult<Applied> {
        self.apply(MutationRequest::action(resource, name, body), options)
            .await
    }

    /// Issue a mutation and wait for it to settle.
    ///
    /// A returned handle is awaited with `options.operation`; afterwards the
    /// resource is polled with `options.resource` when given.
    pub async fn apply(
        &self,
        request: MutationRequest,
        options: &LifecycleOptions,
    ) -> OperationResult<Applied> {
        let rules = self.rules(&request.resource.resource_type, options);
        info!("{} {}", request.mutation, request.resource);

        let outcome = self.plane.mutate(&request).await.map_err(|e| {
            self.remote_error(
                format!("{} failed", request.mutation),
                &e,
                &rules,
                &request.resource,
            )
        })?;

        let (resource, response, operation_id) = match outcome {
            MutationOutcome::Completed { resource, body } => (resource, body, None),
            MutationOutcome::Accepted(handle) => {
                let resource = handle.resource.clone();
                let id = handle.id.clone();
                let config = options
                    .operation
                    .clone()
                    .unwrap_or_else(LifecycleOptions::job_wait);
                self.await_operation(handle, &config).await?;
                (resource, Value::Null, Some(id))
            }
        };

        let observation = match &options.resource {
            Some(config) => {
                if !resource.has_id() {
                    return Err(OperationError::new(format!(
                        "{} finished without revealing the resource id",
                        request.mutation
                    ))
                    .for_resource(resource));
                }
                let config = with_resolved_rules(config.clone(), rules);
                self.await_resource(&resource, &config).await?.observation
            }
            None => None,
        };

        Ok(Applied {
            resource,
            response,
            operation_id,
            observation,
        })
    }

    /// Wait for an asynchronous operation, consuming its handle
    pub async fn await_operation(
        &self,
        handle: OperationHandle,
        config: &WaitConfig,
    ) -> OperationResult<FinalState> {
        let resource = handle.resource.clone();
        let context = format!("operation {}", handle.id);
        wait_for_operation(handle, |h| self.plane.read_operation(h), config, &self.cancel)
            .await
            .map_err(|e| OperationError::from_wait(context, e).for_resource(resource))
    }

    /// Poll a resource until `config` is satisfied
    pub async fn await_resource(
        &self,
        resource: &ResourceRef,
        config: &WaitConfig,
    ) -> OperationResult<FinalState> {
        wait_for(|| self.plane.read(resource), config, &self.cancel)
            .await
            .map_err(|e| {
                OperationError::from_wait(
                    format!("waiting for {}", config.states.describe_target()),
                    e,
                )
                .for_resource(resource.clone())
            })
    }

    /// Read a resource; `None` when it does not exist
    pub async fn read(
        &self,
        resource: &ResourceRef,
        options: &LifecycleOptions,
    ) -> OperationResult<Option<Observation>> {
        let rules = self.rules(&resource.resource_type, options);
        match self.plane.read(resource).await {
            Ok(observation) => Ok(Some(observation)),
            Err(e) => {
                let envelope = classify_any(&e, &rules);
                if envelope.is_not_found() {
                    debug!("{} not found", resource);
                    Ok(None)
                } else {
                    Err(OperationError::remote("read failed", envelope).for_resource(resource.clone()))
                }
            }
        }
    }

    /// Delete a resource and wait until it is gone.
    ///
    /// Idempotent: a resource that is already absent, whether reported by the
    /// delete call or by the follow-up reads, is a success.
    pub async fn delete(
        &self,
        resource: &ResourceRef,
        options: &LifecycleOptions,
    ) -> OperationResult<()> {
        let rules = self.rules(&resource.resource_type, options);
        info!("delete {}", resource);

        match self
            .plane
            .mutate(&MutationRequest::delete(resource.clone()))
            .await
        {
            Ok(MutationOutcome::Completed { .. }) => {}
            Ok(MutationOutcome::Accepted(handle)) => {
                let config = options
                    .operation
                    .clone()
                    .unwrap_or_else(LifecycleOptions::job_wait);
                self.await_operation(handle, &config).await?;
            }
            Err(e) => {
                let envelope = classify_any(&e, &rules);
                if envelope.is_not_found() {
                    info!("{} already gone", resource);
                    return Ok(());
                }
                return Err(
                    OperationError::remote("delete failed", envelope).for_resource(resource.clone())
                );
            }
        }

        let base = options
            .resource
            .clone()
            .unwrap_or_else(|| WaitConfig::for_deletion(Vec::<String>::new()));
        let config = WaitConfig {
            not_found: NotFoundPolicy::Succeed,
            ..with_resolved_rules(base, rules)
        };
        self.await_resource(resource, &config).await?;
        info!("{} deleted", resource);
        Ok(())
    }

    /// List every resource of a type, following continuation cursors
    pub async fn list(
        &self,
        resource_type: &str,
        limit: usize,
        max_pages: Option<usize>,
    ) -> OperationResult<Vec<Value>> {
        let fetch = |cursor: String, limit: usize| {
            self.plane.list_page(resource_type, &cursor, limit)
        };
        let mut pager = Paginator::new(fetch, limit);
        if let Some(max) = max_pages {
            pager = pager.max_pages(max);
        }

        pager.try_collect().await.map_err(|e| match e {
            PaginationError::Fetch(err) => {
                OperationError::remote(format!("list {} failed", resource_type), classify_any(&err, &[]))
            }
            other => OperationError::new(format!("list {}: {}", resource_type, other)),
        })
    }
}
