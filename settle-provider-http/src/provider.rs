//! HttpControlPlane - ControlPlane over a JSON REST API
//!
//! Mutations map onto the collection and item paths of the resource kind:
//! create is `POST collection`, update is `PUT item`, delete is
//! `DELETE item`, and an action is `POST item/{action}`. A response holding
//! one of the kind's handle keys becomes an operation handle. Lists page by
//! `marker` or by `offset`, as the kind declares.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use reqwest::Method;
use serde_json::Value;
use settle_core::path::search_str;
use settle_core::{
    BoxFuture, Cancellation, ControlPlane, Mutation, MutationOutcome, MutationRequest,
    NotFoundRule, Observation, OperationHandle, Page, RemoteError, ResourceRef, StateSets,
};

use crate::auth::TokenCache;
use crate::client::HttpClient;
use crate::config::{ConfigResult, ProviderConfig};
use crate::resources::{PaginationStyle, ResourceKind, ResourceRegistry};
use crate::utils::{encode_segment, expand_path};

/// Separator of compound `PHASE_OPERATION` statuses
const COMPOUND_SEPARATOR: char = '_';

pub struct HttpControlPlane {
    client: HttpClient,
    project_id: String,
    registry: ResourceRegistry,
}

impl HttpControlPlane {
    pub fn new(client: HttpClient, project_id: impl Into<String>, registry: ResourceRegistry) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            registry,
        }
    }

    /// Build a control plane for a validated configuration
    pub fn from_config(config: &ProviderConfig, tokens: Arc<TokenCache>) -> ConfigResult<Self> {
        config.validate()?;
        let client = HttpClient::from_config(config, tokens)?;
        Ok(Self::new(client, config.project_id.clone(), config.registry()))
    }

    /// Abort 429 back-off sleeps when `cancel` fires
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.client = self.client.with_cancellation(cancel);
        self
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Get the configured kind for a resource type
    pub fn kind(&self, resource_type: &str) -> Result<&ResourceKind, RemoteError> {
        self.registry.get(resource_type).ok_or_else(|| {
            RemoteError::local(format!(
                "unknown resource type '{}' (configured: {})",
                resource_type,
                self.registry.names().join(", ")
            ))
        })
    }

    /// Adjust caller state sets to how this resource type reports status
    pub fn states_for(&self, resource_type: &str, states: StateSets) -> StateSets {
        match self.registry.get(resource_type) {
            Some(kind) if kind.compound_status => states.split_compound(COMPOUND_SEPARATOR),
            _ => states,
        }
    }

    fn expand(&self, template: &str, id: &str, job_id: &str) -> String {
        let values = HashMap::from([
            ("project_id", self.project_id.as_str()),
            ("id", id),
            ("job_id", job_id),
        ]);
        expand_path(template, &values)
    }

    fn item_path(&self, kind: &ResourceKind, id: &str) -> Result<String, RemoteError> {
        if id.is_empty() {
            return Err(RemoteError::local(format!(
                "{} request needs a resource id",
                kind.name
            )));
        }
        Ok(self.expand(&kind.item_template(), id, ""))
    }

    async fn mutate_resource(
        &self,
        request: MutationRequest,
    ) -> Result<MutationOutcome, RemoteError> {
        let kind = self.kind(&request.resource.resource_type)?;
        let id = request.resource.id.as_str();
        let body = Some(&request.body).filter(|b| !b.is_null());

        let (method, path) = match &request.mutation {
            Mutation::Create => (Method::POST, self.expand(&kind.collection_path, "", "")),
            Mutation::Update => (Method::PUT, self.item_path(kind, id)?),
            Mutation::Delete => (Method::DELETE, self.item_path(kind, id)?),
            Mutation::Action(action) => (
                Method::POST,
                format!("{}/{}", self.item_path(kind, id)?, encode_segment(action)),
            ),
        };

        let response = self.client.request(method, &path, &[], body).await?;

        let mut resource = request.resource.clone();
        if !resource.has_id()
            && let Some(id) = search_str(&response, &kind.id_key).filter(|id| !id.is_empty())
        {
            resource.id = id;
        }

        match OperationHandle::from_response(&response, &kind.handle_keys, resource.clone()) {
            Some(handle) => {
                debug!("{} {} returned operation {}", request.mutation, resource, handle.id);
                Ok(MutationOutcome::Accepted(handle))
            }
            None => Ok(MutationOutcome::Completed {
                resource,
                body: response,
            }),
        }
    }

    async fn read_resource(&self, resource: ResourceRef) -> Result<Observation, RemoteError> {
        let kind = self.kind(&resource.resource_type)?;
        let path = self.item_path(kind, &resource.id)?;
        let body = self.client.request(Method::GET, &path, &[], None).await?;
        Ok(Observation::from_payload(body, &kind.status_key))
    }

    async fn read_job(&self, job_id: String, resource: ResourceRef) -> Result<Observation, RemoteError> {
        let kind = self.kind(&resource.resource_type)?;
        let Some(template) = &kind.job_path else {
            return Err(RemoteError::local(format!(
                "resource type '{}' has no job_path to follow operation {}",
                kind.name, job_id
            )));
        };
        let path = self.expand(template, &resource.id, &job_id);
        let body = self.client.request(Method::GET, &path, &[], None).await?;
        Ok(Observation::from_payload(body, &kind.job_status_key))
    }

    async fn fetch_page(
        &self,
        resource_type: String,
        cursor: String,
        limit: usize,
    ) -> Result<Page<Value>, RemoteError> {
        let kind = self.kind(&resource_type)?;
        let path = self.expand(&kind.collection_path, "", "");
        let mut query = vec![("limit", limit.to_string())];

        match kind.pagination {
            PaginationStyle::Marker => {
                if !cursor.is_empty() {
                    query.push(("marker", cursor));
                }
                let body = self.client.request(Method::GET, &path, &query, None).await?;
                Ok(Page::from_json(&body, &kind.items_key, &kind.cursor_key))
            }
            PaginationStyle::Offset => {
                let offset = parse_offset(&cursor)?;
                query.push(("offset", offset.to_string()));
                let body = self.client.request(Method::GET, &path, &query, None).await?;
                let page = Page::from_json(&body, &kind.items_key, &kind.cursor_key);
                let received = page.items.len();
                let next = if received == 0 || received < limit {
                    String::new()
                } else {
                    (offset + received).to_string()
                };
                Ok(Page::new(page.items, next))
            }
        }
    }
}

/// Offset cursors are item counts; the first page starts at zero
fn parse_offset(cursor: &str) -> Result<usize, RemoteError> {
    if cursor.is_empty() {
        return Ok(0);
    }
    cursor
        .parse()
        .map_err(|_| RemoteError::local(format!("invalid offset cursor '{}'", cursor)))
}

// =============================================================================
// ControlPlane Trait Implementation
// =============================================================================

impl ControlPlane for HttpControlPlane {
    fn name(&self) -> &str {
        "http"
    }

    fn mutate(
        &self,
        request: &MutationRequest,
    ) -> BoxFuture<'_, Result<MutationOutcome, RemoteError>> {
        let request = request.clone();
        Box::pin(async move { self.mutate_resource(request).await })
    }

    fn read(&self, resource: &ResourceRef) -> BoxFuture<'_, Result<Observation, RemoteError>> {
        let resource = resource.clone();
        Box::pin(async move { self.read_resource(resource).await })
    }

    fn read_operation(
        &self,
        handle: &OperationHandle,
    ) -> BoxFuture<'_, Result<Observation, RemoteError>> {
        let job_id = handle.id.clone();
        let resource = handle.resource.clone();
        Box::pin(async move { self.read_job(job_id, resource).await })
    }

    fn list_page(
        &self,
        resource_type: &str,
        cursor: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Page<Value>, RemoteError>> {
        let resource_type = resource_type.to_string();
        let cursor = cursor.to_string();
        Box::pin(async move { self.fetch_page(resource_type, cursor, limit).await })
    }

    fn not_found_rules(&self, resource_type: &str) -> Vec<NotFoundRule> {
        self.registry
            .get(resource_type)
            .map(|kind| kind.not_found.clone())
            .unwrap_or_else(|| vec![NotFoundRule::not_found()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::Phase;

    fn plane() -> HttpControlPlane {
        let registry = ResourceRegistry::new(vec![
            ResourceKind::new("vpn_gateway", "v5/{project_id}/vpn-gateways"),
            ResourceKind::new("er_attachment", "v3/{project_id}/attachments").with_compound_status(),
        ]);
        HttpControlPlane::new(
            HttpClient::new("http://127.0.0.1:1", reqwest::Client::new()),
            "p1",
            registry,
        )
    }

    #[test]
    fn test_item_path() {
        let plane = plane();
        let kind = plane.kind("vpn_gateway").unwrap();
        assert_eq!(
            plane.item_path(kind, "gw-1").unwrap(),
            "v5/p1/vpn-gateways/gw-1"
        );
        assert!(plane.item_path(kind, "").unwrap_err().local);
        assert_eq!(
            plane.item_path(kind, "gw/../1?x").unwrap(),
            "v5/p1/vpn-gateways/gw%2F..%2F1%3Fx"
        );
    }

    #[test]
    fn test_unknown_kind_is_local_error() {
        let err = plane().kind("volume").unwrap_err();
        assert!(err.local);
        assert!(err.to_string().contains("vpn_gateway"));
    }

    #[test]
    fn test_states_for_compound_kind() {
        let plane = plane();
        let states = plane.states_for("er_attachment", StateSets::new(["PENDING"], ["SUCCESS"]));
        assert_eq!(states.phase_of("SUCCESS_BIND"), Phase::TerminalSuccess);

        let states = plane.states_for("vpn_gateway", StateSets::new(["PENDING"], ["SUCCESS"]));
        assert_eq!(states.phase_of("SUCCESS_BIND"), Phase::TerminalFailure);
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("").unwrap(), 0);
        assert_eq!(parse_offset("40").unwrap(), 40);
        assert!(parse_offset("gw-2").unwrap_err().local);
    }

    #[tokio::test]
    async fn test_read_operation_without_job_path() {
        let plane = plane();
        let handle = OperationHandle::new("job-1", ResourceRef::new("vpn_gateway", "gw-1"));
        let err = plane.read_operation(&handle).await.unwrap_err();
        assert!(err.local);
        assert!(err.message.contains("job_path"));
    }
}
