//! Resource kind registry
//!
//! Each resource kind tells the HTTP control plane where a type lives and
//! where the interesting values sit in its responses:
//! - Path templates for the collection, single items and job handles
//! - Response keys for ids, statuses, handles, list items and cursors
//! - How list calls page (`marker` or `offset`)
//! - The "gone" rules the backend uses for this type

use serde::{Deserialize, Serialize};
use settle_core::NotFoundRule;

use crate::utils::placeholders;

fn default_id_key() -> String {
    "id".to_string()
}

fn default_status_key() -> String {
    "status".to_string()
}

fn default_handle_keys() -> Vec<String> {
    settle_core::OperationHandle::DEFAULT_KEYS
        .iter()
        .map(|k| k.to_string())
        .collect()
}

fn default_items_key() -> String {
    "items".to_string()
}

fn default_cursor_key() -> String {
    "page_info.next_marker".to_string()
}

fn default_not_found() -> Vec<NotFoundRule> {
    vec![NotFoundRule::not_found()]
}

/// How a list endpoint pages through its collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStyle {
    /// `marker` query parameter, next marker read from `cursor_key`
    #[default]
    Marker,
    /// `offset` query parameter advanced by the number of items received;
    /// a short or empty page ends the listing
    Offset,
}

/// Configuration of one remote resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKind {
    /// Resource type name used by callers (e.g., "vpn_gateway")
    pub name: String,
    /// Collection template (e.g., "v5/{project_id}/vpn-gateways")
    pub collection_path: String,
    /// Item template; defaults to `{collection_path}/{id}`
    #[serde(default)]
    pub item_path: Option<String>,
    /// Job template with `{job_id}`; required to follow operation handles
    #[serde(default)]
    pub job_path: Option<String>,
    #[serde(default = "default_id_key")]
    pub id_key: String,
    #[serde(default = "default_status_key")]
    pub status_key: String,
    #[serde(default = "default_status_key")]
    pub job_status_key: String,
    #[serde(default = "default_handle_keys")]
    pub handle_keys: Vec<String>,
    #[serde(default = "default_items_key")]
    pub items_key: String,
    #[serde(default = "default_cursor_key")]
    pub cursor_key: String,
    #[serde(default)]
    pub pagination: PaginationStyle,
    #[serde(default = "default_not_found")]
    pub not_found: Vec<NotFoundRule>,
    /// Statuses look like `PHASE_OPERATION` (e.g., "SUCCESS_BIND")
    #[serde(default)]
    pub compound_status: bool,
}

impl ResourceKind {
    pub fn new(name: impl Into<String>, collection_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection_path: collection_path.into(),
            item_path: None,
            job_path: None,
            id_key: default_id_key(),
            status_key: default_status_key(),
            job_status_key: default_status_key(),
            handle_keys: default_handle_keys(),
            items_key: default_items_key(),
            cursor_key: default_cursor_key(),
            pagination: PaginationStyle::default(),
            not_found: default_not_found(),
            compound_status: false,
        }
    }

    pub fn with_item_path(mut self, template: impl Into<String>) -> Self {
        self.item_path = Some(template.into());
        self
    }

    pub fn with_job_path(mut self, template: impl Into<String>) -> Self {
        self.job_path = Some(template.into());
        self
    }

    pub fn with_pagination(mut self, style: PaginationStyle) -> Self {
        self.pagination = style;
        self
    }

    pub fn with_not_found(mut self, rules: Vec<NotFoundRule>) -> Self {
        self.not_found = rules;
        self
    }

    pub fn with_compound_status(mut self) -> Self {
        self.compound_status = true;
        self
    }

    /// Template addressing a single item
    pub fn item_template(&self) -> String {
        self.item_path
            .clone()
            .unwrap_or_else(|| format!("{}/{{id}}", self.collection_path.trim_end_matches('/')))
    }

    /// Check every template only uses placeholders it can be given
    pub fn validate(&self) -> Result<(), String> {
        let templates = [
            ("collection_path", Some(self.collection_path.clone()), &["project_id"][..]),
            ("item_path", Some(self.item_template()), &["project_id", "id"][..]),
            ("job_path", self.job_path.clone(), &["project_id", "id", "job_id"][..]),
        ];
        for (field, template, allowed) in templates {
            let Some(template) = template else { continue };
            if let Some(unknown) = placeholders(&template)
                .into_iter()
                .find(|p| !allowed.contains(&p.as_str()))
            {
                return Err(format!(
                    "resource '{}': {} uses unknown placeholder {{{}}}",
                    self.name, field, unknown
                ));
            }
        }
        if self.collection_path.trim().is_empty() {
            return Err(format!("resource '{}': collection_path is empty", self.name));
        }
        Ok(())
    }
}

/// Lookup table of configured resource kinds
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    kinds: Vec<ResourceKind>,
}

impl ResourceRegistry {
    pub fn new(kinds: Vec<ResourceKind>) -> Self {
        Self { kinds }
    }

    /// Get the kind for a resource type name
    pub fn get(&self, name: &str) -> Option<&ResourceKind> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.kinds.iter().map(|k| k.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
