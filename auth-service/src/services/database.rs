//! PostgreSQL store for roles, permissions and their links.
//!
//! Every multi-statement write runs in one transaction. Link inserts select
//! their members from the member table, so an id that does not exist shows
//! up as a short row count and the whole write is rolled back.

use service_core::error::AppError;
use sqlx::postgres::{PgExecutor, PgPool, Postgres};
use sqlx::Transaction;
use uuid::Uuid;

use crate::models::{fold_role_rows, NewPermission, Permission, RolePermissionRow, RoleWithPermissions};

const ROLE_ROWS: &str = r#"
    SELECT r.id AS role_id,
           r.name AS role_name,
           p.id AS permission_id,
           p.value AS permission_value,
           p.scope AS permission_scope,
           p.description AS permission_description
    FROM roles r
    LEFT JOIN role_permissions rp ON rp.role_id = r.id
    LEFT JOIN permissions p ON p.id = rp.permission_id
"#;

const USER_ROLE_ROWS: &str = r#"
    SELECT r.id AS role_id,
           r.name AS role_name,
           p.id AS permission_id,
           p.value AS permission_value,
           p.scope AS permission_scope,
           p.description AS permission_description
    FROM user_roles ur
    JOIN roles r ON r.id = ur.role_id
    LEFT JOIN role_permissions rp ON rp.role_id = r.id
    LEFT JOIN permissions p ON p.id = rp.permission_id
    WHERE ur.user_id = $1
    ORDER BY r.name, r.id, p.value, p.id
"#;

const ROLE_ORDER: &str = "ORDER BY r.name, r.id, p.value, p.id";

/// A many-to-many link table between an owner and members of another table.
#[derive(Debug, Clone, Copy)]
pub struct Association {
    table: &'static str,
    owner_column: &'static str,
    member_column: &'static str,
    member_table: &'static str,
}

pub const ROLE_PERMISSIONS: Association = Association {
    table: "role_permissions",
    owner_column: "role_id",
    member_column: "permission_id",
    member_table: "permissions",
};

pub const USER_ROLES: Association = Association {
    table: "user_roles",
    owner_column: "user_id",
    member_column: "role_id",
    member_table: "roles",
};

impl Association {
    async fn clear(&self, tx: &mut Transaction<'static, Postgres>, owner: Uuid) -> Result<u64, AppError> {
        let sql = format!("DELETE FROM {} WHERE {} = $1", self.table, self.owner_column);
        let result = sqlx::query(&sql)
            .bind(owner)
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    /// Links every member to `owner`. Fails with `BadRequest` when any member
    /// does not exist and `Conflict` when a link is already present.
    async fn insert(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        owner: Uuid,
        members: &[Uuid],
    ) -> Result<(), AppError> {
        if members.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "INSERT INTO {} ({}, {}) SELECT $1, id FROM {} WHERE id = ANY($2)",
            self.table, self.owner_column, self.member_column, self.member_table
        );
        let result = sqlx::query(&sql)
            .bind(owner)
            .bind(members)
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;

        expect_rows(self.member_table, members.len(), result.rows_affected())
    }

    /// Unlinks members from `owner`. Every member must currently be linked.
    async fn remove(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        owner: Uuid,
        members: &[Uuid],
    ) -> Result<(), AppError> {
        if members.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = ANY($2)",
            self.table, self.owner_column, self.member_column
        );
        let result = sqlx::query(&sql)
            .bind(owner)
            .bind(members)
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;

        expect_rows(self.table, members.len(), result.rows_affected())
    }
}

fn expect_rows(what: &str, expected: usize, affected: u64) -> Result<(), AppError> {
    if affected == expected as u64 {
        Ok(())
    } else {
        Err(AppError::BadRequest(anyhow::anyhow!(
            "expected {} {} rows, matched {}",
            expected,
            what,
            affected
        )))
    }
}

/// Collapse repeated ids, keeping first-seen order.
fn dedupe(ids: &[Uuid]) -> Vec<Uuid> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    unique
}

fn db_error(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("23505") => return AppError::Conflict(anyhow::anyhow!("link already exists")),
            Some("23503") => {
                return AppError::BadRequest(anyhow::anyhow!("reference to a missing row"))
            }
            _ => {}
        }
    }
    AppError::DatabaseError(anyhow::anyhow!(e))
}

fn require_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("role name is required")));
    }
    Ok(name.to_string())
}

fn require_value(permission: &NewPermission) -> Result<(), AppError> {
    if permission.value.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("permission value is required")));
    }
    Ok(())
}

async fn role_with_permissions<'e, E>(
    executor: E,
    role_id: Uuid,
) -> Result<Option<RoleWithPermissions>, AppError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("{} WHERE r.id = $1 {}", ROLE_ROWS, ROLE_ORDER);
    let rows = sqlx::query_as::<_, RolePermissionRow>(&sql)
        .bind(role_id)
        .fetch_all(executor)
        .await
        .map_err(db_error)?;
    Ok(fold_role_rows(rows).into_iter().next())
}

async fn user_roles<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<RoleWithPermissions>, AppError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, RolePermissionRow>(USER_ROLE_ROWS)
        .bind(user_id)
        .fetch_all(executor)
        .await
        .map_err(db_error)?;
    Ok(fold_role_rows(rows))
}

/// Commit on success, roll back on failure. A failed rollback is logged and
/// the original error is returned.
async fn finish<T>(
    tx: Transaction<'static, Postgres>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(db_error)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "Transaction rollback failed");
            }
            Err(e)
        }
    }
}

/// RBAC repository.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        crate::db::health_check(&self.pool).await
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(db_error)
    }

    // ==================== Roles ====================

    #[tracing::instrument(skip(self, permission_ids))]
    pub async fn create_role(
        &self,
        name: &str,
        permission_ids: &[Uuid],
    ) -> Result<RoleWithPermissions, AppError> {
        let name = require_name(name)?;
        let permission_ids = dedupe(permission_ids);
        let role_id = Uuid::new_v4();

        let mut tx = self.begin().await?;
        let result = async {
            sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2)")
                .bind(role_id)
                .bind(&name)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            ROLE_PERMISSIONS.insert(&mut tx, role_id, &permission_ids).await?;

            role_with_permissions(&mut *tx, role_id)
                .await?
                .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("created role vanished")))
        }
        .await;

        let role = finish(tx, result).await?;
        tracing::info!(role_id = %role_id, "Role created");
        Ok(role)
    }

    /// Rename a role and replace its whole permission set.
    #[tracing::instrument(skip(self, permission_ids))]
    pub async fn update_role(
        &self,
        role_id: Uuid,
        name: &str,
        permission_ids: &[Uuid],
    ) -> Result<RoleWithPermissions, AppError> {
        let name = require_name(name)?;
        let permission_ids = dedupe(permission_ids);

        let mut tx = self.begin().await?;
        let result = async {
            let renamed = sqlx::query("UPDATE roles SET name = $2 WHERE id = $1")
                .bind(role_id)
                .bind(&name)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            if renamed.rows_affected() == 0 {
                return Err(AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)));
            }

            ROLE_PERMISSIONS.clear(&mut tx, role_id).await?;
            ROLE_PERMISSIONS.insert(&mut tx, role_id, &permission_ids).await?;

            role_with_permissions(&mut *tx, role_id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)))
        }
        .await;

        finish(tx, result).await
    }

    pub async fn delete_role(&self, role_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)));
        }
        tracing::info!(role_id = %role_id, "Role deleted");
        Ok(())
    }

    pub async fn find_role(&self, role_id: Uuid) -> Result<Option<RoleWithPermissions>, AppError> {
        role_with_permissions(&self.pool, role_id).await
    }

    pub async fn list_roles(&self) -> Result<Vec<RoleWithPermissions>, AppError> {
        let sql = format!("{} {}", ROLE_ROWS, ROLE_ORDER);
        let rows = sqlx::query_as::<_, RolePermissionRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(fold_role_rows(rows))
    }

    // ==================== Permissions ====================

    pub async fn create_permission(&self, permission: &NewPermission) -> Result<Permission, AppError> {
        require_value(permission)?;

        sqlx::query_as::<_, Permission>(
            r#"
            INSERT INTO permissions (id, value, scope, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, value, scope, description
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(permission.value.trim())
        .bind(&permission.scope)
        .bind(&permission.description)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    pub async fn update_permission(
        &self,
        permission_id: Uuid,
        permission: &NewPermission,
    ) -> Result<Permission, AppError> {
        require_value(permission)?;

        sqlx::query_as::<_, Permission>(
            r#"
            UPDATE permissions SET value = $2, scope = $3, description = $4
            WHERE id = $1
            RETURNING id, value, scope, description
            "#,
        )
        .bind(permission_id)
        .bind(permission.value.trim())
        .bind(&permission.scope)
        .bind(&permission.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("permission {} not found", permission_id)))
    }

    pub async fn delete_permission(&self, permission_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "permission {} not found",
                permission_id
            )));
        }
        Ok(())
    }

    pub async fn find_permission(&self, permission_id: Uuid) -> Result<Option<Permission>, AppError> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, value, scope, description FROM permissions WHERE id = $1",
        )
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, AppError> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, value, scope, description FROM permissions ORDER BY value, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Create `permissions`, a role holding them, and link `user_id` to it in
    /// one transaction. Does nothing and returns `None` when any role exists.
    /// The roles table is locked so concurrent callers seed at most once.
    #[tracing::instrument(skip(self, permissions))]
    pub async fn seed_first_role(
        &self,
        name: &str,
        permissions: &[NewPermission],
        user_id: Uuid,
    ) -> Result<Option<RoleWithPermissions>, AppError> {
        let name = require_name(name)?;
        for permission in permissions {
            require_value(permission)?;
        }

        let mut tx = self.begin().await?;
        let result = async {
            sqlx::query("LOCK TABLE roles IN SHARE ROW EXCLUSIVE MODE")
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            let seeded: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM roles)")
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
            if seeded {
                return Ok(None);
            }

            let mut permission_ids = Vec::with_capacity(permissions.len());
            for permission in permissions {
                let id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO permissions (id, value, scope, description)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(permission.value.trim())
                .bind(&permission.scope)
                .bind(&permission.description)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
                permission_ids.push(id);
            }

            let role_id = Uuid::new_v4();
            sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2)")
                .bind(role_id)
                .bind(&name)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            ROLE_PERMISSIONS.insert(&mut tx, role_id, &permission_ids).await?;
            USER_ROLES.insert(&mut tx, user_id, &[role_id]).await?;

            role_with_permissions(&mut *tx, role_id).await
        }
        .await;

        finish(tx, result).await
    }

    // ==================== Role <-> Permission ====================

    /// Replace the permission set of a role.
    #[tracing::instrument(skip(self, permission_ids))]
    pub async fn set_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<RoleWithPermissions, AppError> {
        let permission_ids = dedupe(permission_ids);

        let mut tx = self.begin().await?;
        let result = async {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
            if exists.is_none() {
                return Err(AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)));
            }

            ROLE_PERMISSIONS.clear(&mut tx, role_id).await?;
            ROLE_PERMISSIONS.insert(&mut tx, role_id, &permission_ids).await?;

            role_with_permissions(&mut *tx, role_id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)))
        }
        .await;

        finish(tx, result).await
    }

    pub async fn find_role_permissions(&self, role_id: Uuid) -> Result<Vec<Permission>, AppError> {
        self.find_role(role_id)
            .await?
            .map(|role| role.permissions)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)))
    }

    // ==================== User <-> Role ====================

    /// Replace the role set of a user.
    #[tracing::instrument(skip(self, role_ids))]
    pub async fn set_user_roles(
        &self,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<Vec<RoleWithPermissions>, AppError> {
        let role_ids = dedupe(role_ids);

        let mut tx = self.begin().await?;
        let result = async {
            USER_ROLES.clear(&mut tx, user_id).await?;
            USER_ROLES.insert(&mut tx, user_id, &role_ids).await?;
            user_roles(&mut *tx, user_id).await
        }
        .await;

        finish(tx, result).await
    }

    /// Link additional roles. Fails with `Conflict` if any is already linked.
    #[tracing::instrument(skip(self, role_ids))]
    pub async fn add_user_roles(
        &self,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<Vec<RoleWithPermissions>, AppError> {
        let role_ids = dedupe(role_ids);

        let mut tx = self.begin().await?;
        let result = async {
            USER_ROLES.insert(&mut tx, user_id, &role_ids).await?;
            user_roles(&mut *tx, user_id).await
        }
        .await;

        finish(tx, result).await
    }

    /// Unlink roles. Every listed role must currently be linked.
    #[tracing::instrument(skip(self, role_ids))]
    pub async fn remove_user_roles(
        &self,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<Vec<RoleWithPermissions>, AppError> {
        let role_ids = dedupe(role_ids);

        let mut tx = self.begin().await?;
        let result = async {
            USER_ROLES.remove(&mut tx, user_id, &role_ids).await?;
            user_roles(&mut *tx, user_id).await
        }
        .await;

        finish(tx, result).await
    }

    pub async fn find_user_roles_with_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RoleWithPermissions>, AppError> {
        user_roles(&self.pool, user_id).await
    }
}
