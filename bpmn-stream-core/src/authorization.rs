//! Authorization decisions: permission grants and tenant access.

use crate::config::EngineConfig;
use crate::state::{SharedState, UserType};
use crate::types::*;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Resource id every authorization request carries; a grant on it covers all resources.
pub const WILDCARD_PERMISSION: &str = "*";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    ProcessDefinition,
    User,
    Tenant,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessDefinition => "PROCESS_DEFINITION",
            Self::User => "USER",
            Self::Tenant => "TENANT",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    Create,
    Read,
    Update,
    Delete,
    UpdateUserTask,
}

impl PermissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::UpdateUserTask => "UPDATE_USER_TASK",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a command needs permission for, plus the resource it resolved to.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest<R> {
    resource_type: ResourceType,
    permission_type: PermissionType,
    resource_ids: BTreeSet<String>,
    resource: Option<R>,
}

impl<R> AuthorizationRequest<R> {
    pub fn new(resource_type: ResourceType, permission_type: PermissionType) -> Self {
        let mut resource_ids = BTreeSet::new();
        resource_ids.insert(WILDCARD_PERMISSION.to_string());
        Self {
            resource_type,
            permission_type,
            resource_ids,
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: R) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn add_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_ids.insert(resource_id.into());
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn permission_type(&self) -> PermissionType {
        self.permission_type
    }

    pub fn resource_ids(&self) -> &BTreeSet<String> {
        &self.resource_ids
    }

    pub fn into_resource(self) -> Option<R> {
        self.resource
    }

    pub fn unauthorized_message(&self) -> String {
        format!(
            "Unauthorized to perform operation '{}' on resource '{}'",
            self.permission_type, self.resource_type
        )
    }
}

/// Decides whether the identity on a command holds a permission.
pub struct AuthorizationCheckBehavior {
    state: SharedState,
    enabled: bool,
}

impl AuthorizationCheckBehavior {
    pub fn new(state: SharedState, config: &EngineConfig) -> Self {
        Self {
            state,
            enabled: config.enable_authorization,
        }
    }

    pub fn is_authorized<V: RecordValue, R>(
        &self,
        command: &TypedRecord<V>,
        request: &AuthorizationRequest<R>,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(true);
        }

        let Some(user_key) = authorized_user_key(&command.authorizations) else {
            tracing::debug!(key = command.key, "command carries no authorized user");
            return Ok(false);
        };

        let Some(user) = self.state.get_user(user_key)? else {
            tracing::debug!(user_key, "authorized user is unknown");
            return Ok(false);
        };

        if user.user_type == UserType::Default {
            return Ok(true);
        }

        let granted = self.state.get_resource_identifiers(
            user_key,
            request.resource_type(),
            request.permission_type(),
        )?;
        Ok(granted.iter().any(|id| request.resource_ids().contains(id)))
    }
}

pub fn authorized_user_key(authorizations: &Authorizations) -> Option<Key> {
    authorizations
        .get(AUTHORIZED_USER_KEY)
        .and_then(serde_json::Value::as_i64)
}

/// Tenant access derived from a command's authorizations map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantAuthorizationChecker {
    tenants: BTreeSet<String>,
}

impl TenantAuthorizationChecker {
    /// Without an `authorized_tenants` entry only the default tenant is accessible.
    pub fn from_authorizations(authorizations: &Authorizations) -> Self {
        let tenants = match authorizations.get(AUTHORIZED_TENANTS) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::from([DEFAULT_TENANT.to_string()]),
        };
        Self { tenants }
    }

    pub fn is_authorized(&self, tenant_id: &str) -> bool {
        self.tenants.contains(tenant_id)
    }
}
