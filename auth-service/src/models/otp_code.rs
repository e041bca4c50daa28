//! One-time code records kept in the key-value store.

use rand::Rng;
use serde::{Deserialize, Serialize};
use service_core::grpc::proto::auth::OtpPurpose;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use validator::Validate;

/// Stored under [`otp_key`]. Only the hash of the code is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub code_hash: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Input to a password mutation gated by a request token.
#[derive(Clone, Validate)]
pub struct PasswordRedemption {
    pub user_id: Uuid,
    #[validate(length(min = 1, message = "request token is required"))]
    pub request_token: String,
    #[validate(length(min = 8, max = 128, message = "password must be 8 to 128 characters"))]
    pub new_password: String,
    #[validate(must_match(other = "new_password", message = "confirmation does not match"))]
    pub confirmation: String,
}

impl fmt::Debug for PasswordRedemption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordRedemption")
            .field("user_id", &self.user_id)
            .field("request_token", &"<redacted>")
            .field("new_password", &"<redacted>")
            .field("confirmation", &"<redacted>")
            .finish()
    }
}

pub fn otp_key(user_id: &Uuid, purpose: OtpPurpose) -> String {
    format!("otp:{}:{}", user_id, purpose.as_key())
}

pub fn request_token_key(user_id: &Uuid, purpose: OtpPurpose) -> String {
    format!("otp-request:{}:{}", user_id, purpose.as_key())
}

/// Random numeric code of `length` digits from the thread-local CSPRNG.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time inequality for hex digests and request tokens.
pub fn hashes_mismatch(expected: &str, actual: &str) -> bool {
    !bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
}
