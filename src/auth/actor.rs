//! 请求主体解析
//!
//! [`ActorResolver`] is the only place that interprets session state. It
//! turns the request metadata into an [`Actor`]: either the localhost
//! bootstrap origin or an authenticated user with the effective permission
//! set loaded fresh from storage.
//!
//! A session minted from a refresh token is only honoured while that token
//! is still active. Disabling a token updates the row before deleting its
//! sessions, so this check closes the window in between.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::permission::{Permission, Permissions};
use super::session::{Session, SessionError, SessionResult, SessionStore, SubjectId};
use crate::error::AppError;
use crate::models::user::User;
use crate::repository::{
    PermissionRepository, RefreshTokenRepository, StorageError, UserRepository,
};

/// Metadata key carrying the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Metadata key carrying the caller's request id.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Request metadata relevant to authentication.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub access_token: Option<String>,
    pub request_id: Option<String>,
    pub peer: Option<SocketAddr>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let value = |key: &str| {
            headers
                .get(key)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            access_token: value(ACCESS_TOKEN_KEY),
            request_id: value(REQUEST_ID_KEY),
            peer,
        }
    }

    /// Loopback test on the textual peer address.
    pub fn is_loopback(&self) -> bool {
        self.peer
            .is_some_and(|addr| addr.ip().to_string().starts_with("127.0.0.1"))
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self::from_headers(&parts.headers, peer))
    }
}

/// The principal behind a request.
#[derive(Debug, Clone)]
pub enum Actor {
    /// Caller on the loopback interface without a session.
    Localhost,
    Authenticated {
        user: User,
        permissions: Permissions,
    },
}

impl Actor {
    pub fn is_local(&self) -> bool {
        matches!(self, Actor::Localhost)
    }

    pub fn is_superuser(&self) -> bool {
        self.user().is_some_and(|u| u.is_superuser)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Actor::Localhost => None,
            Actor::Authenticated { user, .. } => Some(user),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.user().map(|u| u.id)
    }

    pub fn permissions(&self) -> Option<&Permissions> {
        match self {
            Actor::Localhost => None,
            Actor::Authenticated { permissions, .. } => Some(permissions),
        }
    }

    /// Explicit grant check. Localhost and superuser bypasses are the
    /// firewall's business.
    pub fn has(&self, permission: &Permission) -> bool {
        self.permissions().is_some_and(|p| p.contains(permission))
    }

    pub fn has_any(&self, permissions: &[Permission]) -> bool {
        self.permissions().is_some_and(|p| p.contains_any(permissions))
    }
}

#[derive(Clone)]
pub struct ActorResolver {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserRepository>,
    permissions: Arc<dyn PermissionRepository>,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
}

impl ActorResolver {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserRepository>,
        permissions: Arc<dyn PermissionRepository>,
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
    ) -> Self {
        Self {
            sessions,
            users,
            permissions,
            refresh_tokens,
        }
    }

    /// Live session behind `access_token`.
    pub async fn session(&self, access_token: &str) -> SessionResult<Session> {
        let session = self.sessions.get(access_token).await?;
        self.verify(session).await
    }

    async fn context_session(&self, ctx: &RequestContext) -> SessionResult<Session> {
        let session = self.sessions.context(ctx).await?;
        self.verify(session).await
    }

    /// Rejects and abandons a session whose refresh token was revoked,
    /// expired or removed after the session was started.
    async fn verify(&self, session: Session) -> SessionResult<Session> {
        let Some(token) = session.refresh_token.as_deref() else {
            return Ok(session);
        };

        let active = match self.refresh_tokens.find_one_by_token(token).await {
            Ok(refresh_token) => refresh_token.is_active(Utc::now()),
            Err(StorageError::NotFound) => false,
            Err(e) => {
                return Err(SessionError::Internal(format!(
                    "refresh token fetch failure: {e}"
                )))
            }
        };
        if active {
            return Ok(session);
        }

        warn!(
            subject_id = %session.subject_id,
            "Session bound to an inactive refresh token rejected"
        );
        match self.sessions.abandon(&session.access_token).await {
            Ok(()) | Err(SessionError::NotFound) => {}
            Err(e) => warn!(error = %e, "Failed to abandon stale session"),
        }
        Err(SessionError::NotFound)
    }

    /// Resolves the actor of a request. A loopback caller without a usable
    /// session becomes [`Actor::Localhost`].
    pub async fn resolve(&self, ctx: &RequestContext) -> Result<Actor, AppError> {
        match self.context_session(ctx).await {
            Ok(session) => {
                let subject = session
                    .subject()
                    .map_err(|e| AppError::internal("session carries a malformed subject id", e))?;
                self.load(subject).await
            }
            Err(_) if ctx.is_loopback() => Ok(Actor::Localhost),
            Err(e) => Err(session_failure(e)),
        }
    }

    /// Resolves an authenticated user from `token`, or from the request
    /// metadata when `token` is empty. Never falls back to localhost.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        token: Option<&str>,
    ) -> Result<Actor, AppError> {
        let session = match token.filter(|t| !t.is_empty()) {
            Some(token) => self.session(token).await,
            None => self.context_session(ctx).await,
        }
        .map_err(session_failure)?;

        let subject = session
            .subject()
            .map_err(|e| AppError::internal("session carries a malformed subject id", e))?;
        self.load(subject).await
    }

    async fn load(&self, subject: SubjectId) -> Result<Actor, AppError> {
        let user = self
            .users
            .find_one_by_id(subject.0)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => AppError::not_found("actor does not exist"),
                other => AppError::storage("actor fetch failure", other),
            })?;

        let permissions = self
            .permissions
            .find_by_user_id(user.id)
            .await
            .map_err(|e| AppError::storage("actor permissions fetch failure", e))?;

        Ok(Actor::Authenticated { user, permissions })
    }
}

fn session_failure(err: SessionError) -> AppError {
    match err {
        SessionError::NotFound | SessionError::InvalidArgument(_) => {
            AppError::unauthenticated("session does not exist")
        }
        other => AppError::internal("session fetch failure", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::MemorySessionStore;
    use crate::error::Code;
    use crate::models::patch::Patch;
    use crate::models::refresh_token::{NewRefreshToken, RefreshTokenPatch};
    use crate::models::user::NewUser;
    use crate::repository::Repositories;
    use std::collections::HashMap;
    use std::time::Duration;

    fn resolver(repos: &Repositories, sessions: Arc<dyn SessionStore>) -> ActorResolver {
        ActorResolver::new(
            sessions,
            repos.user.clone(),
            repos.permission.clone(),
            repos.refresh_token.clone(),
        )
    }

    fn ctx(token: Option<&str>, peer: &str) -> RequestContext {
        RequestContext {
            access_token: token.map(str::to_string),
            request_id: None,
            peer: Some(peer.parse().unwrap()),
        }
    }

    #[test]
    fn test_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_KEY, " abc ".parse().unwrap());
        headers.insert(REQUEST_ID_KEY, "".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers, None);
        assert_eq!(ctx.access_token.as_deref(), Some("abc"));
        assert_eq!(ctx.request_id, None);
        assert!(!ctx.is_loopback());
    }

    #[tokio::test]
    async fn test_localhost_fallback_only_on_loopback() {
        let repos = Repositories::memory();
        let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let resolver = resolver(&repos, sessions);

        let actor = resolver.resolve(&ctx(None, "127.0.0.1:5000")).await.unwrap();
        assert!(actor.is_local());

        let err = resolver.resolve(&ctx(None, "10.0.0.7:5000")).await.unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);

        let err = resolver
            .authenticate(&ctx(None, "127.0.0.1:5000"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_authenticated_actor_and_bad_subject() {
        let repos = Repositories::memory();
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let resolver = resolver(&repos, store.clone());

        let user = repos
            .user
            .insert(&NewUser {
                username: "john@example.com".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let session = store
            .start(&SubjectId(user.id).to_string(), HashMap::new(), None)
            .await
            .unwrap();
        let actor = resolver
            .resolve(&ctx(Some(&session.access_token), "10.0.0.7:5000"))
            .await
            .unwrap();
        assert_eq!(actor.id(), Some(user.id));
        assert!(!actor.is_superuser());

        let bad = store.start("user:1", HashMap::new(), None).await.unwrap();
        let err = resolver
            .authenticate(&ctx(None, "10.0.0.7:5000"), Some(&bad.access_token))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);

        let ghost = store
            .start(&SubjectId(999).to_string(), HashMap::new(), None)
            .await
            .unwrap();
        let err = resolver
            .authenticate(&ctx(None, "10.0.0.7:5000"), Some(&ghost.access_token))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_session_of_revoked_refresh_token_is_rejected() {
        let repos = Repositories::memory();
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let resolver = resolver(&repos, store.clone());

        let user = repos
            .user
            .insert(&NewUser {
                username: "john@example.com".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        repos
            .refresh_token
            .insert(&NewRefreshToken {
                token: "r".repeat(64),
                user_id: user.id,
                expire_at: None,
                notes: None,
                created_by: Some(user.id),
            })
            .await
            .unwrap();

        let session = store
            .start(&SubjectId(user.id).to_string(), HashMap::new(), Some(&"r".repeat(64)))
            .await
            .unwrap();
        assert!(resolver.session(&session.access_token).await.is_ok());

        repos
            .refresh_token
            .update_one_by_token_and_user_id(
                &"r".repeat(64),
                user.id,
                &RefreshTokenPatch {
                    revoked: Patch::Value(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = resolver
            .resolve(&ctx(Some(&session.access_token), "10.0.0.7:5000"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
        // the stale session is dropped from the store
        assert!(!store.exists(&session.access_token).await.unwrap());
    }
}
