use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{UserRecord, UserStatus};
use super::repo::{NewUser, ProfileChanges, UserRepository};
use crate::access::{PermissionSet, Role};
use crate::error::AppError;

/// In-process store used by handler and service tests.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<Vec<UserRecord>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: UserRecord) {
        self.users.lock().unwrap().push(record);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<UserRecord> {
        self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    fn modify<F>(&self, id: Uuid, f: F) -> Option<UserRecord>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut users = self.users.lock().unwrap();
        let user = users.iter_mut().find(|u| u.id == id)?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Some(user.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        Ok(self.snapshot(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<UserRecord>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.reset_token == token).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<UserRecord>, AppError> {
        let mut users = self.users.lock().unwrap().clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(AppError::EmailTaken);
        }
        let now = OffsetDateTime::now_utc();
        let record = UserRecord {
            id: Uuid::new_v4(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            avatar: String::new(),
            password_hash: user.password_hash,
            reset_token: String::new(),
            reset_token_exp: None,
            active: UserStatus::Inactive,
            role: Role::User,
            permissions: PermissionSet::new(),
            last_login: None,
            login_ip: String::new(),
            created_at: now,
            updated_at: now,
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<UserRecord>, AppError> {
        if let Some(ref email) = changes.email {
            let users = self.users.lock().unwrap();
            if users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(AppError::EmailTaken);
            }
        }
        Ok(self.modify(id, |u| {
            if let Some(v) = changes.first_name {
                u.first_name = v;
            }
            if let Some(v) = changes.last_name {
                u.last_name = v;
            }
            if let Some(v) = changes.email {
                u.email = v;
            }
            if let Some(v) = changes.avatar {
                u.avatar = v;
            }
        }))
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime, ip: &str) -> Result<(), AppError> {
        self.modify(id, |u| {
            u.last_login = Some(at);
            u.login_ip = ip.to_owned();
        });
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<Option<UserRecord>, AppError> {
        Ok(self.modify(id, |u| u.role = role))
    }

    async fn set_permissions(
        &self,
        id: Uuid,
        permissions: &PermissionSet,
    ) -> Result<Option<UserRecord>, AppError> {
        Ok(self.modify(id, |u| u.permissions = permissions.clone()))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: UserStatus,
    ) -> Result<Option<UserRecord>, AppError> {
        Ok(self.modify(id, |u| u.active = status))
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AppError> {
        self.modify(id, |u| {
            u.reset_token = token.to_owned();
            u.reset_token_exp = Some(expires_at);
        });
        Ok(())
    }

    async fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<(), AppError> {
        self.modify(id, |u| {
            u.password_hash = password_hash.to_owned();
            u.reset_token.clear();
            u.reset_token_exp = None;
        });
        Ok(())
    }
}
