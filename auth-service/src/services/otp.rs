//! One-time code workflow for password change and reset.
//!
//! Per `(user, purpose)` the state moves from absent, to a live code, to a
//! live request token, and back to absent once the password is changed.
//! Atomicity comes from the store (`SET NX` and a compare-and-replace script),
//! never from in-process locks.

use chrono::Utc;
use service_core::error::AppError;
use service_core::grpc::proto::auth::OtpPurpose;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::config::OtpConfig;
use crate::models::otp_code::{
    generate_code, hash_code, hashes_mismatch, otp_key, request_token_key, OtpRecord,
    PasswordRedemption,
};
use crate::services::email::{render_otp_email, EmailProvider};
use crate::services::redis::KeyValueStore;
use crate::services::users::UserDirectory;
use crate::utils::Password;

/// Result of a generate call. `expires_at` is unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedOtp {
    pub user_id: Uuid,
    pub expires_at: i64,
}

pub struct OtpService {
    store: Arc<dyn KeyValueStore>,
    email: Arc<dyn EmailProvider>,
    users: Arc<dyn UserDirectory>,
    config: OtpConfig,
}

pub fn parse_user_id(user_id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(user_id.trim())
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("user_id must be a UUID")))
}

fn ensure_supported(purpose: OtpPurpose) -> Result<(), AppError> {
    match purpose {
        OtpPurpose::PasswordChange | OtpPurpose::PasswordReset => Ok(()),
        OtpPurpose::EmailVerification => Err(AppError::Unimplemented(
            "email verification codes are not supported".to_string(),
        )),
        OtpPurpose::Unspecified => Err(AppError::BadRequest(anyhow::anyhow!(
            "OTP purpose is required"
        ))),
    }
}

fn decode_record(raw: &str) -> Result<OtpRecord, AppError> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Corrupt OTP record: {}", e)))
}

impl OtpService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        email: Arc<dyn EmailProvider>,
        users: Arc<dyn UserDirectory>,
        config: OtpConfig,
    ) -> Self {
        Self {
            store,
            email,
            users,
            config,
        }
    }

    /// Issue a code for the account behind `email` and send it. While a code
    /// is live, repeat calls return its expiry and send nothing.
    #[tracing::instrument(skip(self, email), fields(purpose = purpose.as_key()))]
    pub async fn generate(
        &self,
        email: &str,
        purpose: OtpPurpose,
        language: &str,
    ) -> Result<GeneratedOtp, AppError> {
        ensure_supported(purpose)?;

        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no account for that email")))?;

        let key = otp_key(&user.id, purpose);
        let ttl = self.config.otp_ttl;

        // A second pass covers a live record that expires between SET NX and GET.
        for _ in 0..2 {
            let code = generate_code(self.config.code_length);
            let record = OtpRecord {
                code_hash: hash_code(&code),
                expires_at: Utc::now().timestamp() + ttl.as_secs() as i64,
            };
            let value = serde_json::to_string(&record)
                .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

            if self.store.set_if_absent(&key, &value, ttl).await? {
                self.deliver(&user.email, purpose, language, &code, &key)
                    .await?;
                tracing::info!(user_id = %user.id, "One-time code issued");
                return Ok(GeneratedOtp {
                    user_id: user.id,
                    expires_at: record.expires_at,
                });
            }

            if let Some(existing) = self.store.get(&key).await? {
                let existing = decode_record(&existing)?;
                tracing::info!(user_id = %user.id, "Live one-time code reused");
                return Ok(GeneratedOtp {
                    user_id: user.id,
                    expires_at: existing.expires_at,
                });
            }
        }

        Err(AppError::InternalError(anyhow::anyhow!(
            "OTP record changed during generation"
        )))
    }

    async fn deliver(
        &self,
        to_email: &str,
        purpose: OtpPurpose,
        language: &str,
        code: &str,
        key: &str,
    ) -> Result<(), AppError> {
        let outcome = match render_otp_email(purpose, language, code, self.config.otp_ttl) {
            Ok(message) => self.email.send(to_email, &message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            tracing::error!(error = %e, "One-time code delivery failed; discarding record");
            if let Err(cleanup) = self.store.delete(key).await {
                tracing::error!(error = %cleanup, "Failed to discard undelivered OTP record");
            }
            return Err(AppError::InternalError(anyhow::anyhow!(
                "failed to deliver one-time code"
            )));
        }

        Ok(())
    }

    /// Exchange a correct code for a single-use request token. A wrong code
    /// leaves the live code in place.
    #[tracing::instrument(skip(self, code), fields(purpose = purpose.as_key()))]
    pub async fn validate(
        &self,
        user_id: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<String, AppError> {
        let user_id = parse_user_id(user_id)?;
        ensure_supported(purpose)?;

        let key = otp_key(&user_id, purpose);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no live code")))?;
        let record = decode_record(&raw)?;

        if hashes_mismatch(&record.code_hash, &hash_code(code.trim())) {
            tracing::warn!(user_id = %user_id, "One-time code mismatch");
            return Err(AppError::BadRequest(anyhow::anyhow!("invalid code")));
        }

        let request_token = Uuid::new_v4().to_string();
        let swapped = self
            .store
            .replace_if_equals(
                &key,
                &raw,
                &request_token_key(&user_id, purpose),
                &request_token,
                self.config.request_token_ttl,
            )
            .await?;

        if !swapped {
            return Err(AppError::NotFound(anyhow::anyhow!("no live code")));
        }

        tracing::info!(user_id = %user_id, "One-time code accepted");
        Ok(request_token)
    }

    /// Set a new password if the request token matches. The token is consumed
    /// only after the password change succeeds.
    #[tracing::instrument(skip(self, redemption), fields(user_id = %redemption.user_id, purpose = purpose.as_key()))]
    pub async fn redeem(
        &self,
        redemption: PasswordRedemption,
        purpose: OtpPurpose,
    ) -> Result<(), AppError> {
        ensure_supported(purpose)?;
        redemption.validate()?;

        let key = request_token_key(&redemption.user_id, purpose);
        let stored = self.store.get(&key).await?.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("invalid or expired request token"))
        })?;

        if hashes_mismatch(&stored, &redemption.request_token) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid or expired request token"
            )));
        }

        self.users
            .update_password(redemption.user_id, &Password::new(redemption.new_password))
            .await?;

        if let Err(e) = self.store.delete(&key).await {
            tracing::error!(error = %e, "Failed to consume request token after password change");
        }

        Ok(())
    }
}
