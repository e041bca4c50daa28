//! Server-side permission evaluation against the RBAC graph.

use async_trait::async_trait;
use service_core::error::AppError;
use service_core::grpc::permission::PermissionClient;
use service_core::grpc::proto::auth::{CheckPermissionRequest, CheckPermissionResponse};
use service_core::tonic::Status;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::RoleWithPermissions;
use crate::services::database::Database;

/// Where a principal's roles come from.
#[async_trait]
pub trait RoleSource: Send + Sync {
    async fn roles_for(&self, user_id: Uuid) -> Result<Vec<RoleWithPermissions>, AppError>;
}

#[async_trait]
impl RoleSource for Database {
    async fn roles_for(&self, user_id: Uuid) -> Result<Vec<RoleWithPermissions>, AppError> {
        self.find_user_roles_with_permissions(user_id).await
    }
}

#[derive(Clone)]
pub struct Authorizer {
    roles: Arc<dyn RoleSource>,
}

impl Authorizer {
    pub fn new(roles: Arc<dyn RoleSource>) -> Self {
        Self { roles }
    }

    /// `Ok(())` when `caller` may perform `permission` on `target`.
    ///
    /// A caller acting on itself is always allowed and the role store is not
    /// consulted. Otherwise the target's roles must carry the permission.
    #[tracing::instrument(skip(self))]
    pub async fn check(&self, caller: &str, target: &str, permission: &str) -> Result<(), AppError> {
        let target = target.trim();
        let permission = permission.trim();
        if target.is_empty() || permission.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "target_user_id and permission are required"
            )));
        }

        if caller.trim() == target {
            return Ok(());
        }

        let target_id = Uuid::parse_str(target)
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("target_user_id must be a UUID")))?;

        self.require_granted(target_id, permission).await
    }

    /// `Ok(())` when the principal's own roles carry `permission`. Used by
    /// administrative guards, which have no self-action shortcut.
    #[tracing::instrument(skip(self))]
    pub async fn require_own(&self, principal: &str, permission: &str) -> Result<(), AppError> {
        let principal_id = Uuid::parse_str(principal.trim())
            .map_err(|_| AppError::Forbidden(anyhow::anyhow!("missing permission: {}", permission)))?;

        self.require_granted(principal_id, permission).await
    }

    async fn require_granted(&self, user_id: Uuid, permission: &str) -> Result<(), AppError> {
        let roles = self.roles.roles_for(user_id).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to load roles for permission check");
            AppError::InternalError(anyhow::anyhow!("failed to load roles"))
        })?;

        if roles.iter().any(|role| role.grants(permission)) {
            Ok(())
        } else {
            tracing::info!(user_id = %user_id, permission, "Permission denied");
            Err(AppError::Forbidden(anyhow::anyhow!("missing permission: {}", permission)))
        }
    }
}

/// [`PermissionClient`] that answers from the in-process [`Authorizer`], so
/// this service guards its own RPCs without a network hop.
#[derive(Clone)]
pub struct LocalPermissionClient {
    authorizer: Authorizer,
}

impl LocalPermissionClient {
    pub fn new(authorizer: Authorizer) -> Self {
        Self { authorizer }
    }
}

#[async_trait]
impl PermissionClient for LocalPermissionClient {
    async fn check_permission(
        &self,
        caller_id: &str,
        request: CheckPermissionRequest,
    ) -> Result<CheckPermissionResponse, Status> {
        self.authorizer
            .check(caller_id, &request.target_user_id, &request.permission)
            .await?;
        Ok(CheckPermissionResponse { granted: true })
    }
}
