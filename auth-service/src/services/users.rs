use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::User;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Account lookups and credential mutation.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// `Conflict` when the email is already registered.
    async fn create_user(&self, email: &str, password: &Password) -> Result<User, AppError>;

    /// `NotFound` when the account does not exist.
    async fn update_password(&self, user_id: Uuid, new_password: &Password)
        -> Result<(), AppError>;

    /// Returns the account only when the password matches.
    async fn verify_credentials(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<Option<User>, AppError>;
}

/// `users` table backed directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash FROM users WHERE email = LOWER($1)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT id, email, password_hash FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn create_user(&self, email: &str, password: &Password) -> Result<User, AppError> {
        let hash = hash_password(password)?;
        let id = Uuid::new_v4();

        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash)
            VALUES ($1, LOWER($2), $3)
            RETURNING id, email, password_hash
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(hash.into_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                AppError::Conflict(anyhow::anyhow!("email already registered"))
            }
            other => AppError::DatabaseError(anyhow::anyhow!(other)),
        })
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        new_password: &Password,
    ) -> Result<(), AppError> {
        let hash = hash_password(new_password)?;

        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(hash.into_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("user {} not found", user_id)));
        }

        tracing::info!(user_id = %user_id, "Password updated");
        Ok(())
    }

    async fn verify_credentials(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<Option<User>, AppError> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };

        let stored = PasswordHashString::new(user.password_hash.clone());
        if verify_password(password, &stored)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}

/// In-memory directory for tests. Passwords are kept in plaintext.
#[derive(Default)]
pub struct MockUserDirectory {
    users: Mutex<HashMap<Uuid, (String, String)>>,
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut users) = self.users.lock() {
            users.insert(id, (email.to_lowercase(), password.to_string()));
        }
        id
    }

    pub fn password_of(&self, user_id: Uuid) -> Option<String> {
        self.users
            .lock()
            .ok()
            .and_then(|users| users.get(&user_id).map(|(_, password)| password.clone()))
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, (String, String)>>, AppError> {
        self.users
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock users mutex poisoned: {}", e)))
    }
}

fn mock_user(id: Uuid, email: &str) -> User {
    User {
        id,
        email: email.to_string(),
        password_hash: String::new(),
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = email.trim().to_lowercase();
        Ok(self
            .lock()?
            .iter()
            .find(|(_, (stored, _))| *stored == email)
            .map(|(id, (stored, _))| mock_user(*id, stored)))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self
            .lock()?
            .get(&user_id)
            .map(|(email, _)| mock_user(user_id, email)))
    }

    async fn create_user(&self, email: &str, password: &Password) -> Result<User, AppError> {
        let email = email.trim().to_lowercase();
        let mut users = self.lock()?;
        if users.values().any(|(stored, _)| *stored == email) {
            return Err(AppError::Conflict(anyhow::anyhow!("email already registered")));
        }

        let id = Uuid::new_v4();
        users.insert(id, (email.clone(), password.as_str().to_string()));
        Ok(mock_user(id, &email))
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        new_password: &Password,
    ) -> Result<(), AppError> {
        match self.lock()?.get_mut(&user_id) {
            Some((_, password)) => {
                *password = new_password.as_str().to_string();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!("user {} not found", user_id))),
        }
    }

    async fn verify_credentials(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<Option<User>, AppError> {
        let email = email.trim().to_lowercase();
        Ok(self
            .lock()?
            .iter()
            .find(|(_, (stored, secret))| *stored == email && secret == password.as_str())
            .map(|(id, (stored, _))| mock_user(*id, stored)))
    }
}
