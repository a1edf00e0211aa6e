use crate::error::ApiError;
use crate::users::CurrentUser;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RolePermissions {
    pub permissions: Vec<Permission>,
}

/// Role to permission mapping loaded from `roles.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    pub roles: HashMap<String, RolePermissions>,
}

impl AuthorizationConfig {
    pub fn new(roles_toml: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(roles_toml)
    }

    pub fn permissions_for(&self, role: &str) -> Vec<Permission> {
        self.roles
            .get(role)
            .map(|role| role.permissions.clone())
            .unwrap_or_default()
    }
}

pub fn check(current_user: &CurrentUser, resource: &str, action: &str) -> bool {
    current_user.has_permission(resource, action)
}

/// Same as [`check`] but shaped for `?` in handlers.
pub fn require(current_user: &CurrentUser, resource: &str, action: &str) -> Result<(), ApiError> {
    if check(current_user, resource, action) {
        Ok(())
    } else {
        debug!(
            user_id = current_user.user_id,
            "Denied {resource}:{action}"
        );
        Err(ApiError::Forbidden)
    }
}
