pub mod otp_code;
pub mod role;
pub mod user;

pub use otp_code::{OtpRecord, PasswordRedemption};
pub use role::{fold_role_rows, NewPermission, Permission, Role, RolePermissionRow, RoleWithPermissions};
pub use user::{LoginRequest, TokenResponse, User};
