//! Resource - Identifying remote resources

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to a resource held by the remote control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource type (e.g., "vpn_gateway", "dcs_instance")
    pub resource_type: String,
    /// Identifier issued by the remote system. Empty until a create
    /// response reveals it.
    pub id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Reference to a resource whose identifier is not known yet
    pub fn pending(resource_type: impl Into<String>) -> Self {
        Self::new(resource_type, "")
    }

    /// Returns true once the remote identifier is known
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_id() {
            write!(f, "{}.{}", self.resource_type, self.id)
        } else {
            write!(f, "{}.<pending>", self.resource_type)
        }
    }
}
