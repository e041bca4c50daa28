//! gRPC implementation of AuthzService.

use service_core::grpc::interceptors::require_user_id;
use service_core::grpc::proto::auth::{CheckPermissionRequest, CheckPermissionResponse};
use service_core::grpc::IntoStatus;
use tonic::{Request, Response, Status};

use crate::grpc::proto::authz_service_server::AuthzService;
use crate::services::Authorizer;

pub struct AuthzServiceImpl {
    authorizer: Authorizer,
}

impl AuthzServiceImpl {
    pub fn new(authorizer: Authorizer) -> Self {
        Self { authorizer }
    }
}

#[tonic::async_trait]
impl AuthzService for AuthzServiceImpl {
    async fn check_permission(
        &self,
        request: Request<CheckPermissionRequest>,
    ) -> Result<Response<CheckPermissionResponse>, Status> {
        let caller = require_user_id(&request)?;
        let req = request.into_inner();

        self.authorizer
            .check(&caller, &req.target_user_id, &req.permission)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(CheckPermissionResponse { granted: true }))
    }
}
