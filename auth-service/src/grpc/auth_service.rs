//! gRPC implementation of AuthService.

use std::sync::Arc;

use service_core::grpc::proto::auth::{
    LoginRequest, LoginResponse, ValidateTokenRequest, ValidateTokenResponse,
};
use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use tonic::{Request, Response, Status};
use validator::Validate;

use crate::grpc::proto::auth_service_server::AuthService;
use crate::handlers::auth as auth_handler;
use crate::models;
use crate::services::{JwtService, UserDirectory};

/// gRPC AuthService implementation.
pub struct AuthServiceImpl {
    jwt: JwtService,
    users: Arc<dyn UserDirectory>,
}

impl AuthServiceImpl {
    pub fn new(jwt: JwtService, users: Arc<dyn UserDirectory>) -> Self {
        Self { jwt, users }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();

        let handler_req = models::LoginRequest {
            email: req.email,
            password: req.password,
        };
        handler_req
            .validate()
            .map_err(|e| AppError::from(e).into_status())?;

        let result = auth_handler::login_impl(
            &self.jwt,
            self.users.as_ref(),
            &handler_req.email,
            &handler_req.password,
        )
        .await
        .map_err(|e| e.into_status())?;

        Ok(Response::new(LoginResponse {
            access_token: result.access_token,
            token_type: result.token_type,
            expires_in: result.expires_in,
            user_id: result.user_id.to_string(),
        }))
    }

    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let req = request.into_inner();

        let user_id = self
            .jwt
            .validate(&req.access_token)
            .map_err(|e| e.into_status())?;

        Ok(Response::new(ValidateTokenResponse { user_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockUserDirectory, SigningSecret};

    fn service() -> (AuthServiceImpl, uuid::Uuid) {
        let users = Arc::new(MockUserDirectory::new());
        let id = users.insert("lin@example.com", "correct-horse");
        let jwt = JwtService::new(Some(SigningSecret::new(b"grpc-login".to_vec())), 15);
        (AuthServiceImpl::new(jwt, users), id)
    }

    #[tokio::test]
    async fn test_login_then_validate_token() {
        let (service, id) = service();

        let login = service
            .login(Request::new(LoginRequest {
                email: "lin@example.com".to_string(),
                password: "correct-horse".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(login.user_id, id.to_string());

        let validated = service
            .validate_token(Request::new(ValidateTokenRequest {
                access_token: login.access_token,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(validated.user_id, id.to_string());
    }

    #[tokio::test]
    async fn test_login_rejects_malformed_email() {
        let (service, _) = service();

        let status = service
            .login(Request::new(LoginRequest {
                email: "not-an-email".to_string(),
                password: "correct-horse".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_validate_token_rejects_garbage() {
        let (service, _) = service();

        let status = service
            .validate_token(Request::new(ValidateTokenRequest {
                access_token: "a.b.c".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }
}
