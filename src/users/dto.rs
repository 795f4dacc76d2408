use serde::Deserialize;

use super::model::UserStatus;
use super::repo::ProfileChanges;
use crate::access::{PermissionSet, Role};
use crate::auth::services::normalize_email;
use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// `(limit, offset)` with limit clamped to `1..=MAX_PAGE_SIZE`.
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// Self-service profile edit. Blank fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

impl TryFrom<UpdateMeRequest> for ProfileChanges {
    type Error = AppError;

    fn try_from(req: UpdateMeRequest) -> Result<Self, Self::Error> {
        let changes = ProfileChanges {
            first_name: non_blank(req.first_name),
            last_name: non_blank(req.last_name),
            email: non_blank(req.email)
                .map(|e| normalize_email(&e))
                .transpose()?,
            avatar: non_blank(req.avatar),
        };
        if changes.is_empty() {
            return Err(AppError::MissingData);
        }
        Ok(changes)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub active: UserStatus,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub permissions: PermissionSet,
}
