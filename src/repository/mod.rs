//! Database repository layer
//!
//! One trait per table. The PostgreSQL implementations live in [`postgres`],
//! the in-memory ones (same constraint semantics, used by tests and
//! database-less runs) in [`memory`]. Errors stay faithful to the storage
//! primitives; translation to RPC status codes happens in the services.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::permission::Permissions;
use crate::models::{
    group::{Group, GroupCriteria, GroupPatch, NewGroup},
    permission::{PermissionCriteria, PermissionEntity, RegisterOutcome, SetOutcome},
    refresh_token::{NewRefreshToken, RefreshToken, RefreshTokenCriteria, RefreshTokenPatch},
    user::{NewUser, User, UserCriteria, UserPatch},
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NOT_NULL_VIOLATION: &str = "23502";
const CHECK_VIOLATION: &str = "23514";
const QUERY_CANCELED: &str = "57014";

/// 存储层错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no rows matched")]
    NotFound,

    #[error("unique constraint {0} violated")]
    UniqueViolation(String),

    #[error("foreign key constraint {0} violated")]
    ForeignKeyViolation(String),

    #[error("column {0} cannot be null")]
    NotNullViolation(String),

    #[error("check constraint {0} violated")]
    CheckViolation(String),

    #[error("query canceled")]
    Canceled,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StorageError {
    /// Constraint name carried by a violation, if any.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            StorageError::UniqueViolation(c)
            | StorageError::ForeignKeyViolation(c)
            | StorageError::CheckViolation(c) => Some(c),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let translated = match &err {
            sqlx::Error::RowNotFound => Some(StorageError::NotFound),
            sqlx::Error::Database(db) => {
                let constraint = || db.constraint().unwrap_or_default().to_string();
                match db.code().as_deref() {
                    Some(UNIQUE_VIOLATION) => Some(StorageError::UniqueViolation(constraint())),
                    Some(FOREIGN_KEY_VIOLATION) => {
                        Some(StorageError::ForeignKeyViolation(constraint()))
                    }
                    Some(NOT_NULL_VIOLATION) => {
                        let column = db
                            .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                            .and_then(|e| e.column())
                            .unwrap_or_default()
                            .to_string();
                        Some(StorageError::NotNullViolation(column))
                    }
                    Some(CHECK_VIOLATION) => Some(StorageError::CheckViolation(constraint())),
                    Some(QUERY_CANCELED) => Some(StorageError::Canceled),
                    _ => None,
                }
            }
            _ => None,
        };

        translated.unwrap_or(StorageError::Database(err))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, criteria: &UserCriteria) -> StorageResult<Vec<User>>;
    async fn find_one_by_id(&self, id: i64) -> StorageResult<User>;
    async fn find_one_by_username(&self, username: &str) -> StorageResult<User>;
    async fn count(&self, criteria: &UserCriteria) -> StorageResult<i64>;
    async fn exists(&self, id: i64) -> StorageResult<bool>;
    async fn insert(&self, user: &NewUser) -> StorageResult<User>;
    /// Inserts, or applies `patch` to the row holding the same username.
    async fn upsert(&self, user: &NewUser, patch: &UserPatch) -> StorageResult<User>;
    async fn update_one_by_id(&self, id: i64, patch: &UserPatch) -> StorageResult<User>;
    async fn update_last_login_at(&self, id: i64) -> StorageResult<()>;
    async fn delete_one_by_id(&self, id: i64) -> StorageResult<u64>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find(&self, criteria: &GroupCriteria) -> StorageResult<Vec<Group>>;
    async fn find_one_by_id(&self, id: i64) -> StorageResult<Group>;
    /// Groups the user belongs to, ordered by id.
    async fn find_by_user_id(&self, user_id: i64) -> StorageResult<Vec<Group>>;
    async fn count(&self, criteria: &GroupCriteria) -> StorageResult<i64>;
    async fn insert(&self, group: &NewGroup) -> StorageResult<Group>;
    /// Inserts, or applies `patch` to the row holding the same name.
    async fn upsert(&self, group: &NewGroup, patch: &GroupPatch) -> StorageResult<Group>;
    async fn update_one_by_id(&self, id: i64, patch: &GroupPatch) -> StorageResult<Group>;
    async fn delete_one_by_id(&self, id: i64) -> StorageResult<u64>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn find(&self, criteria: &PermissionCriteria) -> StorageResult<Vec<PermissionEntity>>;
    async fn find_one_by_id(&self, id: i64) -> StorageResult<PermissionEntity>;
    async fn count(&self, criteria: &PermissionCriteria) -> StorageResult<i64>;
    /// Effective set: direct grants plus grants of every group of the user.
    async fn find_by_user_id(&self, user_id: i64) -> StorageResult<Permissions>;
    async fn find_by_group_id(&self, group_id: i64) -> StorageResult<Permissions>;
    /// Reconciles the catalog partition of `subsystem` with `permissions`
    /// in one transaction.
    async fn register(
        &self,
        subsystem: &str,
        permissions: &Permissions,
    ) -> StorageResult<RegisterOutcome>;
}

#[async_trait]
pub trait UserGroupsRepository: Send + Sync {
    async fn exists(&self, user_id: i64, group_id: i64) -> StorageResult<bool>;
    /// Makes the user's groups exactly `group_ids` in one transaction.
    async fn set(
        &self,
        user_id: i64,
        group_ids: &[i64],
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome>;
}

#[async_trait]
pub trait UserPermissionsRepository: Send + Sync {
    /// Makes the user's direct grants exactly `permissions` in one
    /// transaction. With `force`, permissions missing from the catalog are
    /// inserted first.
    async fn set(
        &self,
        user_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome>;
}

#[async_trait]
pub trait GroupPermissionsRepository: Send + Sync {
    async fn set(
        &self,
        group_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn find(&self, criteria: &RefreshTokenCriteria) -> StorageResult<Vec<RefreshToken>>;
    async fn find_one_by_token(&self, token: &str) -> StorageResult<RefreshToken>;
    async fn count(&self, criteria: &RefreshTokenCriteria) -> StorageResult<i64>;
    async fn insert(&self, token: &NewRefreshToken) -> StorageResult<RefreshToken>;
    async fn update_one_by_token_and_user_id(
        &self,
        token: &str,
        user_id: i64,
        patch: &RefreshTokenPatch,
    ) -> StorageResult<RefreshToken>;
}

/// 仓库集合
#[derive(Clone)]
pub struct Repositories {
    pub user: Arc<dyn UserRepository>,
    pub group: Arc<dyn GroupRepository>,
    pub permission: Arc<dyn PermissionRepository>,
    pub user_groups: Arc<dyn UserGroupsRepository>,
    pub user_permissions: Arc<dyn UserPermissionsRepository>,
    pub group_permissions: Arc<dyn GroupPermissionsRepository>,
    pub refresh_token: Arc<dyn RefreshTokenRepository>,
}
