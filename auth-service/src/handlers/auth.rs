//! Password login and caller introspection.

use axum::extract::{Json, State};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::AuthenticatedUser;
use crate::models::{LoginRequest, TokenResponse};
use crate::services::{JwtService, UserDirectory};
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

/// Check credentials and issue an access token. Unknown accounts and wrong
/// passwords fail the same way.
#[tracing::instrument(skip(jwt, users, password))]
pub async fn login_impl(
    jwt: &JwtService,
    users: &dyn UserDirectory,
    email: &str,
    password: &str,
) -> Result<TokenResponse, AppError> {
    let user = users
        .verify_credentials(email, &Password::new(password))
        .await?
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Invalid credentials")))?;

    let access_token = jwt.issue(&user.id.to_string())?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt.access_token_expiry_seconds(),
        user_id: user.id,
    })
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let response = login_impl(&state.jwt, state.users.as_ref(), &req.email, &req.password).await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    /// Present when the principal has a local account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<MeResponse>, AppError> {
    let email = match Uuid::parse_str(&user.user_id) {
        Ok(id) => state.users.find_by_id(id).await?.map(|u| u.email),
        Err(_) => None,
    };

    Ok(Json(MeResponse {
        user_id: user.user_id,
        email,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockUserDirectory, SigningSecret};

    fn jwt() -> JwtService {
        JwtService::new(Some(SigningSecret::new(b"login-secret".to_vec())), 15)
    }

    #[tokio::test]
    async fn test_login_issues_token_for_subject() {
        let users = MockUserDirectory::new();
        let id = users.insert("grace@example.com", "hopper-password");
        let jwt = jwt();

        let response = login_impl(&jwt, &users, "grace@example.com", "hopper-password")
            .await
            .unwrap();

        assert_eq!(response.user_id, id);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 900);
        assert_eq!(jwt.validate(&response.access_token).unwrap(), id.to_string());
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let users = MockUserDirectory::new();
        users.insert("grace@example.com", "hopper-password");

        let wrong = login_impl(&jwt(), &users, "grace@example.com", "nope").await;
        let unknown = login_impl(&jwt(), &users, "ada@example.com", "hopper-password").await;

        assert!(matches!(wrong, Err(AppError::AuthError(_))));
        assert!(matches!(unknown, Err(AppError::AuthError(_))));
    }
}
