//! User domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::criteria::{CriteriaError, Pagination, Scalar, Sort, TimestampFilter};
use super::group::GroupMessage;
use super::patch::Patch;

/// User
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: Vec<u8>,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub is_confirmed: bool,
    pub is_staff: bool,
    pub confirmation_token: Option<Vec<u8>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<i64>,
}

/// Insertable user row. `created_by` is `None` for the first account.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: Vec<u8>,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub is_confirmed: bool,
    pub is_staff: bool,
    pub confirmation_token: Option<Vec<u8>>,
    pub created_by: Option<i64>,
}

/// Partial update of a user row.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Patch<String>,
    pub password: Patch<Vec<u8>>,
    pub first_name: Patch<String>,
    pub last_name: Patch<String>,
    pub is_superuser: Patch<bool>,
    pub is_active: Patch<bool>,
    pub is_confirmed: Patch<bool>,
    pub is_staff: Patch<bool>,
    pub confirmation_token: Patch<Vec<u8>>,
    pub updated_by: Patch<i64>,
}

impl UserPatch {
    /// True when the patch touches no column besides the audit fields.
    pub fn is_empty(&self) -> bool {
        self.username.is_absent()
            && self.password.is_absent()
            && self.first_name.is_absent()
            && self.last_name.is_absent()
            && self.is_superuser.is_absent()
            && self.is_active.is_absent()
            && self.is_confirmed.is_absent()
            && self.is_staff.is_absent()
            && self.confirmation_token.is_absent()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserCriteria {
    pub id: Option<Scalar<i64>>,
    pub username: Option<Scalar<String>>,
    pub is_superuser: Option<bool>,
    pub is_active: Option<bool>,
    pub is_confirmed: Option<bool>,
    pub is_staff: Option<bool>,
    pub created_by: Option<Scalar<i64>>,
    pub created_at: Option<TimestampFilter>,
    pub last_login_at: Option<TimestampFilter>,
    pub page: Pagination,
}

impl UserCriteria {
    pub const SORTABLE: &'static [&'static str] = &[
        "id",
        "username",
        "first_name",
        "last_name",
        "created_at",
        "updated_at",
        "last_login_at",
    ];

    pub fn validate(&self) -> Result<(), CriteriaError> {
        for scalar in [&self.id, &self.created_by].into_iter().flatten() {
            scalar.validate()?;
        }
        if let Some(username) = &self.username {
            username.validate()?;
        }
        for ts in [&self.created_at, &self.last_login_at].into_iter().flatten() {
            ts.validate()?;
        }
        self.page.validate(Self::SORTABLE)
    }

    /// Evaluates every filter against an in-memory row.
    pub fn matches(&self, user: &User) -> bool {
        use super::criteria::matches_bool;

        self.id.as_ref().map_or(true, |f| f.matches(&user.id))
            && self.username.as_ref().map_or(true, |f| f.matches(&user.username))
            && matches_bool(self.is_superuser, user.is_superuser)
            && matches_bool(self.is_active, user.is_active)
            && matches_bool(self.is_confirmed, user.is_confirmed)
            && matches_bool(self.is_staff, user.is_staff)
            && self
                .created_by
                .as_ref()
                .map_or(true, |f| f.matches_opt(user.created_by.as_ref()))
            && self
                .created_at
                .as_ref()
                .map_or(true, |f| f.matches(Some(user.created_at)))
            && self
                .last_login_at
                .as_ref()
                .map_or(true, |f| f.matches(user.last_login_at))
    }
}

/// User as exposed on the wire. Secrets never leave the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub is_confirmed: bool,
    pub is_staff: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<i64>,
}

impl From<User> for UserMessage {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_superuser: user.is_superuser,
            is_active: user.is_active,
            is_confirmed: user.is_confirmed,
            is_staff: user.is_staff,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            created_by: user.created_by,
            updated_at: user.updated_at,
            updated_by: user.updated_by,
        }
    }
}

/// Create user request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub plain_password: String,
    /// Pre-hashed password in PHC string form.
    #[serde(default)]
    pub secure_password: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default)]
    pub is_staff: bool,
}

/// Modify user request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModifyUserRequest {
    pub id: i64,
    #[serde(default)]
    pub username: Patch<String>,
    #[serde(default)]
    pub first_name: Patch<String>,
    #[serde(default)]
    pub last_name: Patch<String>,
    #[serde(default)]
    pub plain_password: Patch<String>,
    #[serde(default)]
    pub secure_password: Patch<String>,
    #[serde(default)]
    pub is_superuser: Patch<bool>,
    #[serde(default)]
    pub is_active: Patch<bool>,
    #[serde(default)]
    pub is_confirmed: Patch<bool>,
    #[serde(default)]
    pub is_staff: Patch<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserIdRequest {
    pub id: i64,
}

/// List users request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUsersRequest {
    pub is_superuser: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_active: Option<bool>,
    pub is_confirmed: Option<bool>,
    pub created_by: Option<i64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    #[serde(default)]
    pub sort: Vec<Sort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetUserPermissionsRequest {
    pub user_id: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Insert unknown permissions into the catalog instead of failing.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetUserGroupsRequest {
    pub user_id: i64,
    #[serde(default)]
    pub groups: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: UserMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListUserGroupsResponse {
    pub groups: Vec<GroupMessage>,
}
