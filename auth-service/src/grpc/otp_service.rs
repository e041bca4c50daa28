//! gRPC implementation of OtpService.

use std::sync::Arc;

use service_core::error::AppError;
use service_core::grpc::interceptors::require_user_id;
use service_core::grpc::proto::auth::{
    ChangePasswordRequest, ChangePasswordResponse, GenerateOtpRequest, GenerateOtpResponse,
    OtpPurpose, ResetPasswordRequest, ResetPasswordResponse, ValidateOtpRequest,
    ValidateOtpResponse,
};
use service_core::grpc::{IntoStatus, PermissionChecker};
use tonic::{Request, Response, Status};

use crate::grpc::proto::otp_service_server::OtpService;
use crate::models::PasswordRedemption;
use crate::services::otp::{parse_user_id, OtpService as OtpWorkflow};

const CHANGE_PASSWORD_PERMISSION: &str = "users.password.change";

pub struct OtpServiceImpl {
    otp: Arc<OtpWorkflow>,
    permissions: PermissionChecker,
}

impl OtpServiceImpl {
    pub fn new(otp: Arc<OtpWorkflow>, permissions: PermissionChecker) -> Self {
        Self { otp, permissions }
    }
}

#[allow(clippy::result_large_err)]
fn parse_purpose(purpose: i32) -> Result<OtpPurpose, Status> {
    OtpPurpose::try_from(purpose).map_err(|_| {
        AppError::BadRequest(anyhow::anyhow!("unknown OTP purpose {}", purpose)).into_status()
    })
}

#[allow(clippy::result_large_err)]
fn redemption(
    user_id: &str,
    request_token: String,
    new_password: String,
    confirmation: String,
) -> Result<PasswordRedemption, Status> {
    Ok(PasswordRedemption {
        user_id: parse_user_id(user_id).map_err(|e| e.into_status())?,
        request_token,
        new_password,
        confirmation,
    })
}

#[tonic::async_trait]
impl OtpService for OtpServiceImpl {
    async fn generate_otp(
        &self,
        request: Request<GenerateOtpRequest>,
    ) -> Result<Response<GenerateOtpResponse>, Status> {
        let req = request.into_inner();
        let purpose = parse_purpose(req.purpose)?;

        let generated = self
            .otp
            .generate(&req.email, purpose, &req.language)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(GenerateOtpResponse {
            user_id: generated.user_id.to_string(),
            expires_at: generated.expires_at,
        }))
    }

    async fn validate_otp(
        &self,
        request: Request<ValidateOtpRequest>,
    ) -> Result<Response<ValidateOtpResponse>, Status> {
        let req = request.into_inner();
        let purpose = parse_purpose(req.purpose)?;

        let request_token = self
            .otp
            .validate(&req.user_id, purpose, &req.code)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(ValidateOtpResponse { request_token }))
    }

    async fn reset_password(
        &self,
        request: Request<ResetPasswordRequest>,
    ) -> Result<Response<ResetPasswordResponse>, Status> {
        let req = request.into_inner();
        let redemption = redemption(
            &req.user_id,
            req.request_token,
            req.new_password,
            req.confirmation,
        )?;

        self.otp
            .redeem(redemption, OtpPurpose::PasswordReset)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(ResetPasswordResponse { success: true }))
    }

    async fn change_password(
        &self,
        request: Request<ChangePasswordRequest>,
    ) -> Result<Response<ChangePasswordResponse>, Status> {
        let caller = require_user_id(&request)?;
        let req = request.into_inner();
        let redemption = redemption(
            &req.user_id,
            req.request_token,
            req.new_password,
            req.confirmation,
        )?;

        self.permissions
            .check_permission(
                &caller,
                CHANGE_PASSWORD_PERMISSION,
                Some(&redemption.user_id.to_string()),
            )
            .await?;

        self.otp
            .redeem(redemption, OtpPurpose::PasswordChange)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(ChangePasswordResponse { success: true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OtpConfig;
    use crate::services::authz::tests::StaticRoles;
    use crate::services::{
        Authorizer, LocalPermissionClient, MockEmailService, MockKeyValueStore, MockUserDirectory,
    };
    use service_core::grpc::inject_user_id;

    struct Harness {
        service: OtpServiceImpl,
        email: Arc<MockEmailService>,
        users: Arc<MockUserDirectory>,
    }

    fn harness(granted: &[&str]) -> Harness {
        let email = Arc::new(MockEmailService::new());
        let users = Arc::new(MockUserDirectory::new());
        let otp = OtpWorkflow::new(
            Arc::new(MockKeyValueStore::new()),
            email.clone(),
            users.clone(),
            OtpConfig::default(),
        );
        let authorizer = Authorizer::new(Arc::new(StaticRoles::granting(granted)));
        let permissions = PermissionChecker::new(Arc::new(LocalPermissionClient::new(authorizer)));

        Harness {
            service: OtpServiceImpl::new(Arc::new(otp), permissions),
            email,
            users,
        }
    }

    async fn request_token(h: &Harness, email: &str, purpose: OtpPurpose) -> (String, String) {
        let generated = h
            .service
            .generate_otp(Request::new(GenerateOtpRequest {
                email: email.to_string(),
                purpose: purpose as i32,
                language: "en".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        let validated = h
            .service
            .validate_otp(Request::new(ValidateOtpRequest {
                user_id: generated.user_id.clone(),
                purpose: purpose as i32,
                code: h.email.last_code().unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();

        (generated.user_id, validated.request_token)
    }

    #[tokio::test]
    async fn test_reset_password_round_trip() {
        let h = harness(&[]);
        let id = h.users.insert("mo@example.com", "old-password");

        let (user_id, token) = request_token(&h, "mo@example.com", OtpPurpose::PasswordReset).await;
        assert_eq!(user_id, id.to_string());

        let response = h
            .service
            .reset_password(Request::new(ResetPasswordRequest {
                user_id,
                request_token: token,
                new_password: "new-password".to_string(),
                confirmation: "new-password".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.success);
        assert_eq!(h.users.password_of(id).as_deref(), Some("new-password"));
    }

    #[tokio::test]
    async fn test_unknown_purpose_is_invalid_argument() {
        let h = harness(&[]);

        let status = h
            .service
            .generate_otp(Request::new(GenerateOtpRequest {
                email: "mo@example.com".to_string(),
                purpose: 42,
                language: String::new(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_change_password_requires_caller() {
        let h = harness(&[]);
        let id = h.users.insert("mo@example.com", "old-password");

        let status = h
            .service
            .change_password(Request::new(ChangePasswordRequest {
                user_id: id.to_string(),
                request_token: "token".to_string(),
                new_password: "new-password".to_string(),
                confirmation: "new-password".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_change_password_for_self() {
        let h = harness(&[]);
        let id = h.users.insert("mo@example.com", "old-password");
        let (user_id, token) =
            request_token(&h, "mo@example.com", OtpPurpose::PasswordChange).await;

        let mut request = Request::new(ChangePasswordRequest {
            user_id,
            request_token: token,
            new_password: "new-password".to_string(),
            confirmation: "new-password".to_string(),
        });
        inject_user_id(&mut request, &id.to_string()).unwrap();

        let response = h.service.change_password(request).await.unwrap().into_inner();

        assert!(response.success);
        assert_eq!(h.users.password_of(id).as_deref(), Some("new-password"));
    }

    #[tokio::test]
    async fn test_change_password_for_other_user_needs_permission() {
        let h = harness(&[]);
        let id = h.users.insert("mo@example.com", "old-password");
        let (user_id, token) =
            request_token(&h, "mo@example.com", OtpPurpose::PasswordChange).await;

        let mut request = Request::new(ChangePasswordRequest {
            user_id,
            request_token: token,
            new_password: "new-password".to_string(),
            confirmation: "new-password".to_string(),
        });
        inject_user_id(&mut request, &uuid::Uuid::new_v4().to_string()).unwrap();

        let status = h.service.change_password(request).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(h.users.password_of(id).as_deref(), Some("old-password"));
    }
}
