//! gRPC service implementations for auth-service.

pub mod auth_service;
pub mod authz_service;
pub mod otp_service;
pub mod role_service;

/// Server stubs generated by `build.rs`. Messages live in
/// `service_core::grpc::proto::auth`.
pub mod proto {
    tonic::include_proto!("auth.v1");
}

pub use auth_service::AuthServiceImpl;
pub use authz_service::AuthzServiceImpl;
pub use otp_service::OtpServiceImpl;
pub use role_service::RoleServiceImpl;
