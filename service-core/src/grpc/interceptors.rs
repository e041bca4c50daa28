//! gRPC metadata helpers for cross-service identity propagation.
//!
//! The gateway resolves the caller once and forwards the principal id as
//! `x-user-id` on every outbound call. Inbound services read it back with
//! [`require_user_id`]; its absence is always `UNAUTHENTICATED`.

use tonic::{Request, Status};

/// gRPC metadata key carrying the authenticated principal id.
pub const USER_ID_KEY: &str = "x-user-id";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Attach the caller's principal id to an outgoing request.
#[allow(clippy::result_large_err)]
pub fn inject_user_id<T>(request: &mut Request<T>, user_id: &str) -> Result<(), Status> {
    let value = user_id
        .parse()
        .map_err(|_| Status::invalid_argument("Invalid x-user-id value"))?;
    request.metadata_mut().insert(USER_ID_KEY, value);
    Ok(())
}

/// Read the caller's principal id from incoming metadata, if present.
pub fn extract_user_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(USER_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read the caller's principal id, failing with `UNAUTHENTICATED` when absent.
#[allow(clippy::result_large_err)]
pub fn require_user_id<T>(request: &Request<T>) -> Result<String, Status> {
    extract_user_id(request).ok_or_else(|| Status::unauthenticated("Missing x-user-id metadata"))
}

/// Extract request ID from incoming gRPC request metadata.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Server interceptor that logs the caller and request id of every inbound call.
#[allow(clippy::result_large_err)]
pub fn identity_logging_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    tracing::debug!(
        user_id = extract_user_id(&request).as_deref().unwrap_or("-"),
        request_id = extract_request_id(&request).as_deref().unwrap_or("-"),
        "Inbound gRPC call"
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_extract_user_id() {
        let mut request = Request::new(());
        inject_user_id(&mut request, "3f7c9a52-0d4e-4a8e-9f1c-6b2d8e5a7c10").unwrap();

        assert_eq!(
            extract_user_id(&request),
            Some("3f7c9a52-0d4e-4a8e-9f1c-6b2d8e5a7c10".to_string())
        );
    }

    #[test]
    fn test_missing_user_id_is_unauthenticated() {
        let request = Request::new(());
        let status = require_user_id(&request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_blank_user_id_is_treated_as_missing() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(USER_ID_KEY, "   ".parse().unwrap());
        assert!(extract_user_id(&request).is_none());
    }

    #[test]
    fn test_interceptor_passes_through() {
        let request = Request::new(());
        assert!(identity_logging_interceptor(request).is_ok());
    }
}
