//! Business logic for the identity and access core.

pub mod authz;
pub mod bootstrap;
pub mod database;
pub mod email;
pub mod jwt;
pub mod otp;
pub mod redis;
pub mod users;

pub use authz::{Authorizer, LocalPermissionClient, RoleSource};
pub use bootstrap::{bootstrap_admin, ADMINISTRATOR_ROLE};
pub use database::Database;
pub use email::{render_otp_email, EmailProvider, EmailService, MockEmailService, RenderedEmail};
pub use jwt::{AccessTokenClaims, JwtService, SigningSecret};
pub use otp::{GeneratedOtp, OtpService};
pub use redis::{KeyValueStore, MockKeyValueStore, RedisService};
pub use users::{MockUserDirectory, PgUserDirectory, UserDirectory};
