use crate::middlewares::authorization::{AuthorizationConfig, Permission};
use chrono::{DateTime, Utc};
use models::user::{Role, SecurityMember, User};
use std::time::Duration;

pub mod route;

#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub user_id: i32,
    pub role: Option<Role>,
    permissions: Vec<Permission>,
}

impl CurrentUser {
    pub fn new(user_id: i32, role: Option<Role>, authorization: &AuthorizationConfig) -> Self {
        let permissions = role
            .map(|role| authorization.permissions_for(role.as_str()))
            .unwrap_or_default();

        CurrentUser {
            user_id,
            role,
            permissions,
        }
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions
            .iter()
            .any(|permission| permission.resource == resource && permission.action == action)
    }
}

pub fn is_active(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    let Ok(window) = chrono::Duration::from_std(window) else {
        return true;
    };
    last_active.is_some_and(|seen| now.signed_duration_since(seen) <= window)
}

pub fn security_member(user: User, now: DateTime<Utc>, window: Duration) -> SecurityMember {
    SecurityMember {
        id: user.id,
        active: is_active(user.last_active, now, window),
        email: user.email,
        location_id: user.location_id,
        last_active: user.last_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_active_window() {
        let now = Utc::now();
        let window = Duration::from_secs(300);

        assert!(is_active(Some(now - chrono::Duration::seconds(299)), now, window));
        assert!(!is_active(Some(now - chrono::Duration::seconds(301)), now, window));
        assert!(!is_active(None, now, window));
    }

    #[test]
    fn test_user_without_role_has_no_permissions() {
        let config = AuthorizationConfig::new(include_str!("../../roles.toml")).unwrap();
        let user = CurrentUser::new(3, None, &config);
        assert!(!user.has_permission("devices", "register"));

        let admin = CurrentUser::new(4, Some(Role::Admin), &config);
        assert!(admin.has_permission("users", "update"));
    }
}
