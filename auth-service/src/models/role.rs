//! Role and permission models.

use serde::{Deserialize, Serialize};
use service_core::grpc::proto::auth as proto;
use sqlx::FromRow;
use uuid::Uuid;

/// Permissions that guard the role management API.
pub mod admin {
    pub const ROLES_CREATE: &str = "admin.roles.create";
    pub const ROLES_READ: &str = "admin.roles.read";
    pub const ROLES_UPDATE: &str = "admin.roles.update";
    pub const ROLES_DELETE: &str = "admin.roles.delete";
    pub const PERMISSIONS_CREATE: &str = "admin.permissions.create";
    pub const PERMISSIONS_READ: &str = "admin.permissions.read";
    pub const PERMISSIONS_UPDATE: &str = "admin.permissions.update";
    pub const PERMISSIONS_DELETE: &str = "admin.permissions.delete";
    pub const USER_ROLES_READ: &str = "admin.user_roles.read";
    pub const USER_ROLES_UPDATE: &str = "admin.user_roles.update";

    pub const ALL: [&str; 10] = [
        ROLES_CREATE,
        ROLES_READ,
        ROLES_UPDATE,
        ROLES_DELETE,
        PERMISSIONS_CREATE,
        PERMISSIONS_READ,
        PERMISSIONS_UPDATE,
        PERMISSIONS_DELETE,
        USER_ROLES_READ,
        USER_ROLES_UPDATE,
    ];
}

/// Role entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

/// A grantable capability. `value` is the string checked by authorization,
/// e.g. `admin.roles.read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub value: String,
    pub scope: String,
    pub description: String,
}

/// Fields for creating or replacing a permission.
#[derive(Debug, Clone)]
pub struct NewPermission {
    pub value: String,
    pub scope: String,
    pub description: String,
}

/// Role together with every permission linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleWithPermissions {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

impl RoleWithPermissions {
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p.value == permission)
    }
}

/// One row of the `roles LEFT JOIN role_permissions LEFT JOIN permissions` read.
/// Permission columns are `NULL` for roles without links.
#[derive(Debug, Clone, FromRow)]
pub struct RolePermissionRow {
    pub role_id: Uuid,
    pub role_name: String,
    pub permission_id: Option<Uuid>,
    pub permission_value: Option<String>,
    pub permission_scope: Option<String>,
    pub permission_description: Option<String>,
}

/// Folds join rows into one entry per role, keeping first-seen order for roles
/// and for each role's permissions. Roles without permissions keep an empty list.
pub fn fold_role_rows(rows: Vec<RolePermissionRow>) -> Vec<RoleWithPermissions> {
    let mut roles: Vec<RoleWithPermissions> = Vec::new();

    for row in rows {
        let index = match roles.iter().position(|r| r.role.id == row.role_id) {
            Some(index) => index,
            None => {
                roles.push(RoleWithPermissions {
                    role: Role {
                        id: row.role_id,
                        name: row.role_name.clone(),
                    },
                    permissions: Vec::new(),
                });
                roles.len() - 1
            }
        };

        if let Some(permission_id) = row.permission_id {
            let entry = &mut roles[index];
            if entry.permissions.iter().all(|p| p.id != permission_id) {
                entry.permissions.push(Permission {
                    id: permission_id,
                    value: row.permission_value.unwrap_or_default(),
                    scope: row.permission_scope.unwrap_or_default(),
                    description: row.permission_description.unwrap_or_default(),
                });
            }
        }
    }

    roles
}

impl From<Permission> for proto::Permission {
    fn from(p: Permission) -> Self {
        Self {
            id: p.id.to_string(),
            value: p.value,
            scope: p.scope,
            description: p.description,
        }
    }
}

impl From<RoleWithPermissions> for proto::Role {
    fn from(r: RoleWithPermissions) -> Self {
        Self {
            id: r.role.id.to_string(),
            name: r.role.name,
            permissions: r.permissions.into_iter().map(Into::into).collect(),
        }
    }
}
