//! First-administrator setup for an empty RBAC graph.

use service_core::error::AppError;
use uuid::Uuid;

use crate::config::BootstrapConfig;
use crate::models::role::admin;
use crate::models::NewPermission;
use crate::services::database::Database;
use crate::services::users::UserDirectory;
use crate::utils::Password;

pub const ADMINISTRATOR_ROLE: &str = "administrator";

fn admin_permissions() -> Vec<NewPermission> {
    admin::ALL
        .iter()
        .map(|value| NewPermission {
            value: value.to_string(),
            scope: "admin".to_string(),
            description: format!("Role management: {}", value),
        })
        .collect()
}

/// Create the `admin.*` permissions, an administrator role holding them, and
/// the configured account with that role. Runs only while no roles exist and
/// returns the administrator's id when it did.
///
/// The account is found or created first; the RBAC rows are written in a
/// single transaction, so an interrupted run leaves no partial graph behind.
#[tracing::instrument(skip_all)]
pub async fn bootstrap_admin(
    db: &Database,
    users: &dyn UserDirectory,
    config: &BootstrapConfig,
) -> Result<Option<Uuid>, AppError> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(None);
    };

    if !db.list_roles().await?.is_empty() {
        tracing::info!("Roles already exist, skipping administrator bootstrap");
        return Ok(None);
    }

    let user = match users.find_by_email(email).await? {
        Some(user) => user,
        None => {
            users
                .create_user(email, &Password::new(password.clone()))
                .await?
        }
    };

    let Some(role) = db
        .seed_first_role(ADMINISTRATOR_ROLE, &admin_permissions(), user.id)
        .await?
    else {
        tracing::info!("Roles were created concurrently, skipping administrator bootstrap");
        return Ok(None);
    };

    tracing::info!(user_id = %user.id, role_id = %role.role.id, "Administrator bootstrapped");
    Ok(Some(user.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_permissions_cover_every_guard() {
        let permissions = admin_permissions();

        assert_eq!(permissions.len(), admin::ALL.len());
        assert!(permissions.iter().all(|p| p.scope == "admin"));
        for value in admin::ALL {
            assert!(permissions.iter().any(|p| p.value == value));
        }
    }
}
