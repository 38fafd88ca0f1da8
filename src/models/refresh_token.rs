//! Refresh token models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::criteria::{matches_bool, CriteriaError, Pagination, Scalar, Sort, TimestampFilter};
use super::patch::Patch;

/// Refresh token
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: i64,
    pub revoked: bool,
    pub expire_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<i64>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| now > at)
    }

    /// A token may mint sessions only while it is neither revoked nor expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token: String,
    pub user_id: i64,
    pub expire_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshTokenPatch {
    pub revoked: Patch<bool>,
    pub expire_at: Patch<DateTime<Utc>>,
    pub last_used_at: Patch<DateTime<Utc>>,
    pub notes: Patch<String>,
    pub updated_by: Patch<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshTokenCriteria {
    pub user_id: Option<Scalar<i64>>,
    pub revoked: Option<bool>,
    pub expire_at: Option<TimestampFilter>,
    pub last_used_at: Option<TimestampFilter>,
    pub page: Pagination,
}

impl RefreshTokenCriteria {
    pub const SORTABLE: &'static [&'static str] =
        &["created_at", "updated_at", "expire_at", "last_used_at", "user_id"];

    pub fn validate(&self) -> Result<(), CriteriaError> {
        if let Some(user_id) = &self.user_id {
            user_id.validate()?;
        }
        for ts in [&self.expire_at, &self.last_used_at].into_iter().flatten() {
            ts.validate()?;
        }
        self.page.validate(Self::SORTABLE)
    }

    pub fn matches(&self, token: &RefreshToken) -> bool {
        self.user_id.as_ref().map_or(true, |f| f.matches(&token.user_id))
            && matches_bool(self.revoked, token.revoked)
            && self.expire_at.as_ref().map_or(true, |f| f.matches(token.expire_at))
            && self
                .last_used_at
                .as_ref()
                .map_or(true, |f| f.matches(token.last_used_at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenMessage {
    pub token: String,
    pub user_id: i64,
    pub revoked: bool,
    pub expire_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<i64>,
}

impl From<RefreshToken> for RefreshTokenMessage {
    fn from(t: RefreshToken) -> Self {
        Self {
            token: t.token,
            user_id: t.user_id,
            revoked: t.revoked,
            expire_at: t.expire_at,
            last_used_at: t.last_used_at,
            notes: t.notes,
            created_at: t.created_at,
            created_by: t.created_by,
            updated_at: t.updated_at,
            updated_by: t.updated_by,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRefreshTokenRequest {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
}

/// Disable and revoke address a token by `(token, user_id)`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenKeyRequest {
    pub token: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRefreshTokensRequest {
    pub user_id: Option<i64>,
    pub revoked: Option<bool>,
    pub expire_at: Option<TimestampFilter>,
    pub last_used_at: Option<TimestampFilter>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    #[serde(default)]
    pub sort: Vec<Sort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub refresh_token: RefreshTokenMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRefreshTokensResponse {
    pub refresh_tokens: Vec<RefreshTokenMessage>,
}
