//! Permission checking for callers of the authorization service.
//!
//! Every service that needs to authorize an action goes through
//! [`PermissionChecker::check_permission`]. A remote "not granted" answer is
//! turned into `PERMISSION_DENIED`; transport and remote errors pass through
//! untouched, so call sites only branch on one denial shape.
//!
//! The remote call sits behind the [`PermissionClient`] trait so tests (and
//! the authorization service itself) can substitute a local implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use super::interceptors::inject_user_id;
use super::proto::auth::authz_service_client::AuthzServiceClient;
use super::proto::auth::{CheckPermissionRequest, CheckPermissionResponse};

/// Transport-level contract of the permission check RPC.
#[async_trait]
pub trait PermissionClient: Send + Sync {
    /// Send a permission check on behalf of `caller_id`.
    async fn check_permission(
        &self,
        caller_id: &str,
        request: CheckPermissionRequest,
    ) -> Result<CheckPermissionResponse, Status>;
}

/// Configuration for the authorization service client.
#[derive(Clone, Debug)]
pub struct AuthzClientConfig {
    /// The gRPC endpoint of the auth service (e.g., "http://auth-service:50051").
    pub endpoint: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl Default for AuthzClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:50051".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// [`PermissionClient`] backed by the remote `AuthzService`.
#[derive(Clone)]
pub struct AuthzPermissionClient {
    client: AuthzServiceClient<Channel>,
}

impl AuthzPermissionClient {
    /// Connect to the authorization service.
    pub async fn connect(config: AuthzClientConfig) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(config.endpoint)?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .connect()
            .await?;

        Ok(Self::from_channel(channel))
    }

    /// Wrap an existing channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: AuthzServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl PermissionClient for AuthzPermissionClient {
    async fn check_permission(
        &self,
        caller_id: &str,
        request: CheckPermissionRequest,
    ) -> Result<CheckPermissionResponse, Status> {
        let mut request = Request::new(request);
        inject_user_id(&mut request, caller_id)?;

        // Tonic clients are cheap to clone and need `&mut self` per call.
        let mut client = self.client.clone();
        let response = client.check_permission(request).await?;
        Ok(response.into_inner())
    }
}

/// Caller-side permission facade.
#[derive(Clone)]
pub struct PermissionChecker {
    client: Option<Arc<dyn PermissionClient>>,
}

impl PermissionChecker {
    /// Create a checker over the given client.
    pub fn new(client: Arc<dyn PermissionClient>) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Create a checker that grants every permission.
    ///
    /// Only meant for local development without an authorization service.
    pub fn disabled() -> Self {
        tracing::warn!("Permission enforcement disabled; every check is granted");
        Self { client: None }
    }

    /// Connect a checker to `endpoint`, or return a disabled checker when no
    /// endpoint is configured.
    pub async fn from_endpoint(endpoint: Option<&str>) -> Result<Self, tonic::transport::Error> {
        match endpoint {
            Some(endpoint) if !endpoint.is_empty() => {
                let client = AuthzPermissionClient::connect(AuthzClientConfig {
                    endpoint: endpoint.to_string(),
                    ..Default::default()
                })
                .await?;

                tracing::info!(
                    authz_endpoint = endpoint,
                    "Permission enforcement enabled via authorization service"
                );
                Ok(Self::new(Arc::new(client)))
            }
            _ => Ok(Self::disabled()),
        }
    }

    /// Check if permission enforcement is enabled.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Require that `permission` is granted.
    ///
    /// `target_user_id` defaults to `caller_id` when omitted.
    ///
    /// # Returns
    /// * `Ok(())` - permission granted (or enforcement disabled)
    /// * `Err(PERMISSION_DENIED)` - the authorization service answered "not granted"
    /// * `Err(other)` - the remote status, unchanged
    #[allow(clippy::result_large_err)]
    pub async fn check_permission(
        &self,
        caller_id: &str,
        permission: &str,
        target_user_id: Option<&str>,
    ) -> Result<(), Status> {
        let Some(client) = &self.client else {
            return Ok(());
        };

        let target_user_id = target_user_id.unwrap_or(caller_id);
        let response = client
            .check_permission(
                caller_id,
                CheckPermissionRequest {
                    target_user_id: target_user_id.to_string(),
                    permission: permission.to_string(),
                },
            )
            .await?;

        if !response.granted {
            tracing::warn!(
                caller_id = caller_id,
                target_user_id = target_user_id,
                permission = permission,
                "Permission denied"
            );
            return Err(Status::permission_denied(format!(
                "missing permission: {}",
                permission
            )));
        }

        Ok(())
    }
}
