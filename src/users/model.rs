use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::{Actor, PermissionSet, Role};

/// Account status. Wire and storage format is the numeric code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserStatus {
    #[default]
    Inactive = 0,
    Active = 1,
    Disabled = 2,
}

impl UserStatus {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Inactive),
            1 => Some(Self::Active),
            2 => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn code(self) -> i16 {
        self as i16
    }
}

impl Serialize for UserStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.code() as u8)
    }
}

impl<'de> Deserialize<'de> for UserStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(d)?;
        Self::from_code(code as i16)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid status code {code}")))
    }
}

/// A persisted user, secrets included.
///
/// Not `Serialize`; it leaves the process only as [`PublicUser`] via [`Redact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub avatar: String,
    pub password_hash: String,
    pub reset_token: String,
    pub reset_token_exp: Option<OffsetDateTime>,
    pub active: UserStatus,
    pub role: Role,
    pub permissions: PermissionSet,
    pub last_login: Option<OffsetDateTime>,
    pub login_ip: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            role: self.role,
            permissions: self.permissions.clone(),
        }
    }
}

/// Client-facing view of a user. Has no secret fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub avatar: String,
    pub active: UserStatus,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    pub login_ip: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub permissions: PermissionSet,
}

pub trait Redact {
    fn redact(self) -> PublicUser;
}

impl Redact for UserRecord {
    fn redact(self) -> PublicUser {
        PublicUser {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            avatar: self.avatar,
            active: self.active,
            role: self.role,
            last_login: self.last_login,
            login_ip: self.login_ip,
            created_at: self.created_at,
            updated_at: self.updated_at,
            permissions: self.permissions,
        }
    }
}

impl Redact for PublicUser {
    fn redact(self) -> PublicUser {
        self
    }
}

impl From<UserRecord> for PublicUser {
    fn from(record: UserRecord) -> Self {
        record.redact()
    }
}
