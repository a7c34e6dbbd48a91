//! Role-based permission checks (spec §4.8, Design Note 9). The source's
//! `Permission(perm)` constructor accepted an arbitrary string; this crate
//! models permissions as a closed enum and rejects unknown names at
//! registration instead of at call time.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
    Call,
    Presence,
}

impl Permission {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            "delete" => Some(Permission::Delete),
            "admin" => Some(Permission::Admin),
            "call" => Some(Permission::Call),
            "presence" => Some(Permission::Presence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub permissions: HashSet<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn viewer() -> Self {
        Self::new("viewer", [Permission::Read, Permission::Presence])
    }

    pub fn editor() -> Self {
        Self::new("editor", [Permission::Read, Permission::Write, Permission::Call, Permission::Presence])
    }

    pub fn admin() -> Self {
        Self::new(
            "admin",
            [
                Permission::Read,
                Permission::Write,
                Permission::Delete,
                Permission::Admin,
                Permission::Call,
                Permission::Presence,
            ],
        )
    }
}

/// Per-(user, resource) role assignment and lookup. A user with no role
/// assigned for a resource has no permissions there — callers that want
/// "no permission manager configured means allow everything" should not
/// construct one (spec's handlers only consult `PermissionManager` when
/// `Some`).
#[derive(Default)]
pub struct PermissionManager {
    user_roles: HashMap<String, HashMap<String, Role>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign_role(&mut self, user_id: impl Into<String>, resource_id: impl Into<String>, role: Role) {
        self.user_roles.entry(user_id.into()).or_default().insert(resource_id.into(), role);
    }

    pub fn get_role(&self, user_id: &str, resource_id: &str) -> Option<&Role> {
        self.user_roles.get(user_id)?.get(resource_id)
    }

    pub fn check_permission(&self, user_id: &str, resource_id: &str, permission: Permission) -> bool {
        self.get_role(user_id, resource_id)
            .map(|role| role.has_permission(permission))
            .unwrap_or(false)
    }

    pub fn revoke_access(&mut self, user_id: &str, resource_id: &str) -> bool {
        self.user_roles.get_mut(user_id).map(|roles| roles.remove(resource_id).is_some()).unwrap_or(false)
    }
}
