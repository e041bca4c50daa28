use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub bootstrap: BootstrapConfig,
    /// Remote authorization endpoint for the password-change permission
    /// check. Unset means the check runs in-process.
    pub authz_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Clone)]
pub struct JwtConfig {
    /// Signing secret from `JWT_SECRET`. Ignored in production, where a
    /// random in-memory secret is generated at startup.
    pub secret: Option<String>,
    pub access_token_expiry_minutes: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field(
                "access_token_expiry_minutes",
                &self.access_token_expiry_minutes,
            )
            .finish()
    }
}

/// One-time code settings. Both lifetimes live here so they are tuned together.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub code_length: usize,
    pub otp_ttl: Duration,
    pub request_token_ttl: Duration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            otp_ttl: Duration::from_secs(15 * 60),
            request_token_ttl: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub from: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// When false, the identity middleware passes every request through.
    pub enabled: bool,
    pub mode: SecurityMode,
}

/// First administrator, created at startup while no roles exist.
#[derive(Clone, Default)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("admin_email", &self.admin_email)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How the edge resolves a caller from a bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Verify signature and expiry locally.
    Direct,
    /// Trust an upstream gateway's validation and only read the subject.
    /// Must only run behind a controlled ingress.
    Gateway,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        if let Ok(port) = env::var("GRPC_PORT") {
            common_config.grpc_port = port
                .parse()
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("GRPC_PORT: {}", e)))?;
        }

        let environment: Environment = get_env_or("ENVIRONMENT", "dev")
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment,
            service_name: get_env_or("SERVICE_NAME", "auth-service"),
            service_version: get_env_or("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            log_level: get_env_or("LOG_LEVEL", "info"),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").ok().filter(|v| !v.is_empty()),
                access_token_expiry_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "15")?,
            },
            otp: OtpConfig {
                code_length: parse_env("OTP_CODE_LENGTH", "6")?,
                otp_ttl: Duration::from_secs(parse_env("OTP_TTL_SECONDS", "900")?),
                request_token_ttl: Duration::from_secs(parse_env(
                    "OTP_REQUEST_TOKEN_TTL_SECONDS",
                    "900",
                )?),
            },
            smtp: SmtpConfig {
                host: get_env_or("SMTP_HOST", "smtp.gmail.com"),
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from: get_env("SMTP_FROM", None, is_prod)?,
            },
            security: SecurityConfig {
                enabled: parse_env("SECURITY_ENABLED", "true")?,
                mode: get_env_or("SECURITY_MODE", "direct")
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            bootstrap: BootstrapConfig {
                admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok().filter(|v| !v.is_empty()),
                admin_password: env::var("BOOTSTRAP_ADMIN_PASSWORD")
                    .ok()
                    .filter(|v| !v.is_empty()),
            },
            authz_endpoint: env::var("AUTHZ_ENDPOINT").ok().filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 || self.common.grpc_port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "HTTP and gRPC ports must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if !(4..=10).contains(&self.otp.code_length) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_CODE_LENGTH must be between 4 and 10"
            )));
        }

        if self.otp.otp_ttl.is_zero() || self.otp.request_token_ttl.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_TTL_SECONDS and OTP_REQUEST_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        match (&self.bootstrap.admin_email, &self.bootstrap.admin_password) {
            (None, None) => {}
            (Some(_), Some(password)) if password.len() >= 8 => {}
            (Some(_), Some(_)) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "BOOTSTRAP_ADMIN_PASSWORD must be at least 8 characters"
                )));
            }
            _ => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                )));
            }
        }

        if self.environment == Environment::Prod {
            if !self.security.enabled {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SECURITY_ENABLED=false is not allowed in production"
                )));
            }

            if self.jwt.secret.is_some() {
                tracing::warn!("JWT_SECRET is ignored in production; a random secret is generated");
            }
        }

        if self.security.mode == SecurityMode::Gateway {
            tracing::warn!(
                "Gateway security mode trusts upstream tokens without verifying signatures; \
                 run only behind a controlled ingress"
            );
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get_env_or(key, default)
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(SecurityMode::Direct),
            "gateway" => Ok(SecurityMode::Gateway),
            _ => Err(format!("Invalid security mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            common: core_config::Config {
                port: 8080,
                grpc_port: 50051,
            },
            environment: Environment::Dev,
            service_name: "auth-service-test".to_string(),
            service_version: "0.0.0".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/auth_test".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            jwt: JwtConfig {
                secret: Some("test-secret".to_string()),
                access_token_expiry_minutes: 15,
            },
            otp: OtpConfig::default(),
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                user: "mailer".to_string(),
                password: "hunter2".to_string(),
                from: "noreply@example.com".to_string(),
            },
            security: SecurityConfig {
                enabled: true,
                mode: SecurityMode::Direct,
            },
            bootstrap: BootstrapConfig::default(),
            authz_endpoint: None,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_code_length() {
        let mut config = test_config();
        config.otp.code_length = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prod_requires_security() {
        let mut config = test_config();
        config.environment = Environment::Prod;
        config.security.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_needs_both_values() {
        let mut config = test_config();
        config.bootstrap.admin_email = Some("root@example.com".to_string());
        assert!(config.validate().is_err());

        config.bootstrap.admin_password = Some("short".to_string());
        assert!(config.validate().is_err());

        config.bootstrap.admin_password = Some("long-enough-password".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = test_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("test-secret"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("Gateway".parse::<SecurityMode>(), Ok(SecurityMode::Gateway));
        assert_eq!("direct".parse::<SecurityMode>(), Ok(SecurityMode::Direct));
        assert!("mesh".parse::<SecurityMode>().is_err());
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
    }
}
