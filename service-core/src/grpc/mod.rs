//! gRPC utilities shared by the identity and access services.
//!
//! This module provides:
//! - Wire types and generated clients for the `auth.v1` package
//! - Error conversion between `AppError` and `tonic::Status`
//! - Identity metadata propagation (`x-user-id`)
//! - The caller-side permission facade
//! - Server builder utilities

pub mod error;
pub mod interceptors;
pub mod permission;
pub mod server;

// Include the generated proto code for clients
pub mod proto {
    pub mod auth {
        tonic::include_proto!("auth.v1");

        impl OtpPurpose {
            /// Segment used for this purpose in key-value store keys.
            pub fn as_key(&self) -> &'static str {
                match self {
                    OtpPurpose::Unspecified => "unspecified",
                    OtpPurpose::PasswordChange => "password-change",
                    OtpPurpose::PasswordReset => "password-reset",
                    OtpPurpose::EmailVerification => "email-verification",
                }
            }
        }
    }
}

pub use error::{GrpcResult, IntoStatus};
pub use interceptors::{
    REQUEST_ID_KEY, USER_ID_KEY, extract_request_id, extract_user_id,
    identity_logging_interceptor, inject_user_id, require_user_id,
};
pub use permission::{AuthzClientConfig, AuthzPermissionClient, PermissionChecker, PermissionClient};
pub use server::GrpcServerBuilder;

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
