use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use service_core::grpc::interceptors::{inject_user_id, USER_ID_KEY};
use service_core::tonic::Status;
use std::collections::HashMap;

use crate::config::{SecurityConfig, SecurityMode};
use crate::services::JwtService;

/// What the identity middleware needs: the token service and the edge mode.
#[derive(Clone)]
pub struct IdentityState {
    pub jwt: JwtService,
    pub security: SecurityConfig,
}

impl IdentityState {
    pub fn new(jwt: JwtService, security: SecurityConfig) -> Self {
        if security.enabled && security.mode == SecurityMode::Gateway {
            tracing::warn!(
                "Identity middleware in gateway mode: bearer signatures are not verified here"
            );
        }
        Self { jwt, security }
    }
}

/// Principal resolved at the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl AuthenticatedUser {
    /// Forward this identity on an outgoing gRPC call.
    #[allow(clippy::result_large_err)]
    pub fn inject_into<T>(&self, request: &mut service_core::tonic::Request<T>) -> Result<(), Status> {
        inject_user_id(request, &self.user_id)
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        Query::<HashMap<String, String>>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(params)| params.get("token").cloned())
            .filter(|token| !token.is_empty())
    })
}

/// Resolves the caller from the bearer credential and attaches it to the
/// request as the `x-user-id` header and an [`AuthenticatedUser`] extension.
/// A client-supplied `x-user-id` is always overwritten, or stripped when the
/// middleware is disabled.
pub async fn identity_middleware(
    State(state): State<IdentityState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.security.enabled {
        req.headers_mut().remove(USER_ID_KEY);
        return Ok(next.run(req).await);
    }

    let token = bearer_token(&req).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing bearer token"))
    })?;

    let user_id = match state.security.mode {
        SecurityMode::Direct => state.jwt.validate(&token)?,
        SecurityMode::Gateway => state.jwt.extract_principal(&token)?,
    };

    let header_value = HeaderValue::from_str(&user_id)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Principal is not a valid header value")))?;
    req.headers_mut().insert(USER_ID_KEY, header_value);
    req.extensions_mut().insert(AuthenticatedUser { user_id });

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("No authenticated user")))
    }
}
