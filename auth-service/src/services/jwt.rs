use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fmt;

use crate::config::{Environment, JwtConfig};

/// Used in dev when `JWT_SECRET` is unset. Never accepted in production.
const DEV_FALLBACK_SECRET: &str = "dev-only-insecure-signing-secret-change-me";

const PROD_SECRET_BYTES: usize = 64;

/// HMAC key material. Held in memory only.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn generate() -> Self {
        let mut bytes = vec![0u8; PROD_SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Dev reads `JWT_SECRET` with a fixed fallback; prod always generates.
    pub fn for_environment(environment: Environment, configured: Option<&str>) -> Self {
        match environment {
            Environment::Prod => Self::generate(),
            Environment::Dev => match configured {
                Some(secret) => Self::new(secret.as_bytes()),
                None => {
                    tracing::warn!("JWT_SECRET not set; using the development fallback secret");
                    Self::new(DEV_FALLBACK_SECRET.as_bytes())
                }
            },
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Principal id. Optional on the wire so a missing claim is reported
    /// as unauthenticated rather than as a decode error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
}

/// Issues and checks HS256 bearer tokens.
#[derive(Clone)]
pub struct JwtService {
    secret: Option<SigningSecret>,
    access_token_expiry_minutes: i64,
}

impl JwtService {
    pub fn new(secret: Option<SigningSecret>, access_token_expiry_minutes: i64) -> Self {
        Self {
            secret,
            access_token_expiry_minutes,
        }
    }

    pub fn from_config(environment: Environment, config: &JwtConfig) -> Self {
        let secret = SigningSecret::for_environment(environment, config.secret.as_deref());
        tracing::info!(
            environment = ?environment,
            expiry_minutes = config.access_token_expiry_minutes,
            "JWT service initialized with HS256"
        );
        Self::new(Some(secret), config.access_token_expiry_minutes)
    }

    fn secret(&self) -> Result<&SigningSecret, AppError> {
        self.secret.as_ref().ok_or_else(|| {
            AppError::FailedPrecondition(anyhow::anyhow!("token signing secret is not configured"))
        })
    }

    /// Sign a credential for `principal` valid for the configured lifetime.
    pub fn issue(&self, principal: &str) -> Result<String, AppError> {
        let secret = self.secret()?;

        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: Some(principal.to_string()),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.access_token_expiry_minutes)).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Verify signature and expiry, returning the principal.
    pub fn validate(&self, token: &str) -> Result<String, AppError> {
        let secret = self.secret()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AppError::Unauthorized(anyhow::anyhow!("Invalid access token: {}", e)))?;

        principal_of(data.claims)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Token has no subject")))
    }

    /// Read the principal without verifying the signature. Only safe behind an
    /// ingress that has already validated the token.
    pub fn extract_principal(&self, token: &str) -> Result<String, AppError> {
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(AppError::BadRequest(anyhow::anyhow!("Malformed token"))),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed token payload: {}", e)))?;

        let claims: AccessTokenClaims = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed token claims: {}", e)))?;

        principal_of(claims)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Token has no subject")))
    }

    /// Lifetime reported to clients, in seconds.
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

fn principal_of(claims: AccessTokenClaims) -> Option<String> {
    claims.sub.filter(|sub| !sub.trim().is_empty())
}
