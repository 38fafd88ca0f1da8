//! Business logic services layer
//!
//! One service per RPC facade. Every operation follows the same sequence:
//! validate the request, resolve the actor, consult the firewall, touch
//! storage, translate storage failures into status codes.

pub mod auth_service;
pub mod group_service;
pub mod permission_service;
pub mod refresh_token_service;
pub mod user_service;

pub use auth_service::AuthService;
pub use group_service::GroupManager;
pub use permission_service::PermissionManager;
pub use refresh_token_service::RefreshTokenManager;
pub use user_service::UserManager;

use std::sync::Arc;

use crate::{
    auth::{
        permission::{Permission, Permissions},
        ActorResolver, PasswordHasher, PermissionRegistry, SessionStore,
    },
    config::SecurityConfig,
    error::AppError,
    models::criteria::CriteriaError,
    repository::Repositories,
};

/// Collaborators shared by every facade.
#[derive(Clone)]
pub struct ServiceContext {
    pub repositories: Repositories,
    pub sessions: Arc<dyn SessionStore>,
    pub resolver: ActorResolver,
    pub hasher: Arc<PasswordHasher>,
    pub registry: Arc<PermissionRegistry>,
    pub security: SecurityConfig,
}

impl ServiceContext {
    pub fn new(
        repositories: Repositories,
        sessions: Arc<dyn SessionStore>,
        hasher: Arc<PasswordHasher>,
        security: SecurityConfig,
    ) -> Self {
        let resolver = ActorResolver::new(
            sessions.clone(),
            repositories.user.clone(),
            repositories.permission.clone(),
            repositories.refresh_token.clone(),
        );
        let registry = Arc::new(PermissionRegistry::new(repositories.permission.clone()));

        Self {
            repositories,
            sessions,
            resolver,
            hasher,
            registry,
            security,
        }
    }

    /// Hashes on the blocking pool; argon2 is deliberately slow.
    pub async fn hash_password(&self, plain: &str) -> Result<Vec<u8>, AppError> {
        let hasher = self.hasher.clone();
        let plain = plain.to_owned();

        tokio::task::spawn_blocking(move || hasher.hash(plain.as_bytes()))
            .await
            .map_err(|e| AppError::internal("password hashing task failure", e))?
            .map_err(|e| AppError::internal("password hashing failure", e))
    }

    /// Compares against `hash`, or against the dummy hash when there is no
    /// stored hash, so both paths cost one verification.
    pub async fn compare_password(
        &self,
        hash: Option<Vec<u8>>,
        candidate: &str,
    ) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let candidate = candidate.to_owned();

        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.compare(&hash, candidate.as_bytes()),
            None => hasher.compare_dummy(candidate.as_bytes()),
        })
        .await
        .map_err(|e| AppError::internal("password comparison task failure", e))
    }
}

pub(crate) fn require_id(id: i64, what: &str) -> Result<(), AppError> {
    if id <= 0 {
        return Err(AppError::InvalidArgument(format!("{what} id must be positive")));
    }
    Ok(())
}

pub(crate) fn parse_permissions(raw: &[String]) -> Result<Permissions, AppError> {
    raw.iter()
        .map(|s| {
            s.parse::<Permission>()
                .map_err(|e| AppError::InvalidArgument(format!("malformed permission {s:?}: {e}")))
        })
        .collect()
}

pub(crate) fn invalid_criteria(err: CriteriaError) -> AppError {
    AppError::InvalidArgument(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;

    #[test]
    fn test_require_id() {
        assert!(require_id(1, "user").is_ok());
        assert_eq!(require_id(0, "user").unwrap_err().code(), Code::InvalidArgument);
        assert_eq!(require_id(-5, "group").unwrap_err().code(), Code::InvalidArgument);
    }

    #[test]
    fn test_parse_permissions() {
        let parsed = parse_permissions(&[" a:b:c ".to_string(), "a:b:d".to_string()]).unwrap();
        assert_eq!(parsed.len(), 2);

        let err = parse_permissions(&["a::c".to_string()]).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
