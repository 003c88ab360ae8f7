//! Authenticated caller identity.

use serde::{Deserialize, Serialize};

/// Tenant-scoped identity of the caller invoking a gated operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub tenant_id: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// `jwt` or `api_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
}

impl Principal {
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            ..Default::default()
        }
    }

    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self::new(tenant_id, "")
    }

    pub fn has_tenant(&self) -> bool {
        !self.tenant_id.trim().is_empty()
    }
}
