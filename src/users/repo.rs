use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{UserRecord, UserStatus};
use crate::access::{PermissionSet, Role};
use crate::error::AppError;

/// Fields supplied at registration; everything else takes its default.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
}

/// Partial profile update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.avatar.is_none()
    }
}

/// Storage for user records. Implementations enforce unique emails and
/// report a clash as [`AppError::EmailTaken`].
///
/// Mutators return `Ok(None)` when no user has the given id.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError>;
    async fn find_by_reset_token(&self, token: &str) -> Result<Option<UserRecord>, AppError>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<UserRecord>, AppError>;
    async fn create(&self, user: NewUser) -> Result<UserRecord, AppError>;
    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<UserRecord>, AppError>;
    async fn record_login(&self, id: Uuid, at: OffsetDateTime, ip: &str) -> Result<(), AppError>;
    async fn set_role(&self, id: Uuid, role: Role) -> Result<Option<UserRecord>, AppError>;
    async fn set_permissions(
        &self,
        id: Uuid,
        permissions: &PermissionSet,
    ) -> Result<Option<UserRecord>, AppError>;
    async fn set_status(&self, id: Uuid, status: UserStatus)
        -> Result<Option<UserRecord>, AppError>;
    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError>;
    /// Replace the password hash and clear any pending reset token.
    async fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<(), AppError>;
}

// ── PostgreSQL ───────────────────────────────────────────────────────────────

macro_rules! user_columns {
    () => {
        "id, first_name, last_name, email, avatar, password_hash, reset_token, \
         reset_token_exp, active, role, permissions, last_login, login_ip, \
         created_at, updated_at"
    };
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    avatar: String,
    password_hash: String,
    reset_token: String,
    reset_token_exp: Option<OffsetDateTime>,
    active: i16,
    role: String,
    permissions: Vec<String>,
    last_login: Option<OffsetDateTime>,
    login_ip: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let active = UserStatus::from_code(r.active)
            .with_context(|| format!("user {} has invalid status {}", r.id, r.active))?;
        let role: Role = r
            .role
            .parse()
            .with_context(|| format!("user {} has invalid role", r.id))?;
        let permissions = PermissionSet::from_tokens(&r.permissions)
            .with_context(|| format!("user {} has invalid permissions", r.id))?;
        Ok(Self {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            avatar: r.avatar,
            password_hash: r.password_hash,
            reset_token: r.reset_token,
            reset_token_exp: r.reset_token_exp,
            active,
            role,
            permissions,
            last_login: r.last_login,
            login_ip: r.login_ip,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn into_record(row: Option<UserRow>) -> Result<Option<UserRecord>, AppError> {
    Ok(row.map(UserRecord::try_from).transpose()?)
}

fn write_error(e: sqlx::Error, what: &'static str) -> AppError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return AppError::EmailTaken;
        }
    }
    AppError::Internal(anyhow::Error::new(e).context(what))
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("find user by id")?;
        into_record(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("find user by email")?;
        into_record(row)
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<UserRecord>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE reset_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("find user by reset token")?;
        into_record(row)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<UserRecord>, AppError> {
        let rows = sqlx::query_as::<_, UserRow>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("list users")?;
        rows.into_iter()
            .map(|r| UserRecord::try_from(r).map_err(AppError::from))
            .collect()
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "INSERT INTO users (id, first_name, last_name, email, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING ",
            user_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, "insert user"))?;
        Ok(UserRecord::try_from(row)?)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "UPDATE users SET \
                first_name = COALESCE($2, first_name), \
                last_name = COALESCE($3, last_name), \
                email = COALESCE($4, email), \
                avatar = COALESCE($5, avatar), \
                updated_at = now() \
             WHERE id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(id)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.email)
        .bind(changes.avatar)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| write_error(e, "update user profile"))?;
        into_record(row)
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime, ip: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login = $2, login_ip = $3, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(at)
            .bind(ip)
            .execute(&self.pool)
            .await
            .context("record login")?;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("set user role")?;
        into_record(row)
    }

    async fn set_permissions(
        &self,
        id: Uuid,
        permissions: &PermissionSet,
    ) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "UPDATE users SET permissions = $2, updated_at = now() WHERE id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(id)
        .bind(permissions.to_tokens())
        .fetch_optional(&self.pool)
        .await
        .context("set user permissions")?;
        into_record(row)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: UserStatus,
    ) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "UPDATE users SET active = $2, updated_at = now() WHERE id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(id)
        .bind(status.code())
        .fetch_optional(&self.pool)
        .await
        .context("set user status")?;
        into_record(row)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET reset_token = $2, reset_token_exp = $3 WHERE id = $1")
            .bind(id)
            .bind(token)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("store reset token")?;
        Ok(())
    }

    async fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET password_hash = $2, reset_token = '', reset_token_exp = NULL, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .context("reset password")?;
        Ok(())
    }
}
