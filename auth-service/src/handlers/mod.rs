//! HTTP handlers for auth-service.

pub mod auth;
pub mod health;

pub use auth::{login, login_impl, me};
pub use health::health_check;
