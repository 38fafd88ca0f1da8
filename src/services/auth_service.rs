//! 认证服务：登录、登出、会话校验与授权查询

use chrono::Utc;
use std::collections::HashMap;
use tracing::info;

use super::{require_id, ServiceContext};
use crate::{
    auth::{
        actor::{Actor, RequestContext},
        firewall::{self, Facts, Operation},
        permission::{Permission, BUILTIN},
        session::{SessionError, SubjectId},
    },
    error::AppError,
    models::{auth::*, patch::Patch, refresh_token::RefreshTokenPatch, user::User, Empty},
    repository::StorageError,
};

/// Identical for an unknown user and a wrong password.
const CREDENTIALS_MISMATCH: &str = "the username and password do not match";

pub struct AuthService {
    ctx: ServiceContext,
}

impl AuthService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// 用户登录
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AppError> {
        match req.into_strategy() {
            LoginStrategy::UsernameAndPassword { username, password } => {
                self.login_with_password(&username, &password).await
            }
            LoginStrategy::RefreshToken { refresh_token } => {
                self.login_with_refresh_token(&refresh_token).await
            }
        }
    }

    async fn login_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, AppError> {
        if username.is_empty() || password.is_empty() {
            return Err(AppError::unauthenticated("empty username or password"));
        }

        let user = match self.ctx.repositories.user.find_one_by_username(username).await {
            Ok(user) => Some(user),
            Err(StorageError::NotFound) => None,
            Err(e) => return Err(AppError::storage("user fetch failure", e)),
        };

        let matched = self
            .ctx
            .compare_password(user.as_ref().map(|u| u.password.clone()), password)
            .await?;

        match user {
            Some(user) if matched => self.start_session(user, None).await,
            _ => Err(AppError::unauthenticated(CREDENTIALS_MISMATCH)),
        }
    }

    async fn login_with_refresh_token(&self, token: &str) -> Result<LoginResponse, AppError> {
        if token.is_empty() {
            return Err(AppError::unauthenticated("empty refresh token"));
        }

        let refresh_token = self
            .ctx
            .repositories
            .refresh_token
            .find_one_by_token(token)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => AppError::unauthenticated("refresh token does not exist"),
                other => AppError::storage("refresh token fetch failure", other),
            })?;

        let now = Utc::now();
        if refresh_token.revoked {
            return Err(AppError::unauthenticated("refresh token is revoked"));
        }
        if refresh_token.is_expired(now) {
            return Err(AppError::unauthenticated("refresh token has expired"));
        }

        let user = self
            .ctx
            .repositories
            .user
            .find_one_by_id(refresh_token.user_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => {
                    AppError::unauthenticated("refresh token owner does not exist")
                }
                other => AppError::storage("user fetch failure", other),
            })?;

        let response = self.start_session(user, Some(token)).await?;

        let patch = RefreshTokenPatch {
            last_used_at: Patch::Value(now),
            ..Default::default()
        };
        self.ctx
            .repositories
            .refresh_token
            .update_one_by_token_and_user_id(token, refresh_token.user_id, &patch)
            .await
            .map_err(|e| AppError::internal("refresh token usage stamp failure", e))?;

        Ok(response)
    }

    async fn start_session(
        &self,
        user: User,
        refresh_token: Option<&str>,
    ) -> Result<LoginResponse, AppError> {
        if !user.is_confirmed {
            return Err(AppError::unauthenticated("user is not confirmed"));
        }
        if !user.is_active {
            return Err(AppError::unauthenticated("user is not active"));
        }

        let bag = HashMap::from([
            ("username".to_string(), user.username.clone()),
            ("first_name".to_string(), user.first_name.clone()),
            ("last_name".to_string(), user.last_name.clone()),
        ]);

        let session = self
            .ctx
            .sessions
            .start(&SubjectId(user.id).to_string(), bag, refresh_token)
            .await
            .map_err(|e| AppError::internal("session start failure", e))?;

        self.ctx
            .repositories
            .user
            .update_last_login_at(user.id)
            .await
            .map_err(|e| AppError::internal("last login update failure", e))?;

        info!(user_id = user.id, "User logged in");

        Ok(LoginResponse {
            access_token: session.access_token,
        })
    }

    /// 用户登出，会话不存在时视为成功
    pub async fn logout(&self, req: AccessTokenRequest) -> Result<Empty, AppError> {
        if req.access_token.is_empty() {
            return Err(AppError::invalid_argument("empty access token"));
        }

        match self.ctx.sessions.abandon(&req.access_token).await {
            Ok(()) | Err(SessionError::NotFound) => Ok(Empty::default()),
            Err(e) => Err(AppError::internal("session abandon failure", e)),
        }
    }

    pub async fn is_authenticated(
        &self,
        req: AccessTokenRequest,
    ) -> Result<IsAuthenticatedResponse, AppError> {
        if req.access_token.is_empty() {
            return Err(AppError::invalid_argument("empty access token"));
        }

        let session = match self.ctx.resolver.session(&req.access_token).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => {
                return Ok(IsAuthenticatedResponse {
                    authenticated: false,
                })
            }
            Err(e) => return Err(AppError::internal("session fetch failure", e)),
        };

        let subject = session
            .subject()
            .map_err(|e| AppError::internal("session carries a malformed subject id", e))?;

        let authenticated = self
            .ctx
            .repositories
            .user
            .exists(subject.0)
            .await
            .map_err(|e| AppError::storage("user existence check failure", e))?;

        Ok(IsAuthenticatedResponse { authenticated })
    }

    /// The principal behind `access_token`, or behind the metadata token
    /// when the field is empty.
    pub async fn actor(
        &self,
        ctx: &RequestContext,
        req: AccessTokenRequest,
    ) -> Result<ActorResponse, AppError> {
        let actor = self
            .ctx
            .resolver
            .authenticate(ctx, Some(req.access_token.as_str()))
            .await?;

        let Actor::Authenticated {
            user,
            mut permissions,
        } = actor
        else {
            return Err(AppError::internal("actor fetch failure", "localhost actor"));
        };

        if user.is_superuser {
            permissions.extend(BUILTIN.iter().cloned());
        }

        Ok(ActorResponse {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_superuser: user.is_superuser,
            is_active: user.is_active,
            is_staff: user.is_staff,
            is_confirmed: user.is_confirmed,
            permissions: permissions.to_strings(),
        })
    }

    pub async fn is_granted(
        &self,
        ctx: &RequestContext,
        req: IsGrantedRequest,
    ) -> Result<IsGrantedResponse, AppError> {
        require_id(req.user_id, "user")?;
        let permission: Permission = req
            .permission
            .parse()
            .map_err(|e| AppError::InvalidArgument(format!("malformed permission: {e}")))?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::IsGranted, &Facts::subject(req.user_id))?;

        let granted = self
            .ctx
            .repositories
            .permission
            .find_by_user_id(req.user_id)
            .await
            .map_err(|e| AppError::storage("user permissions fetch failure", e))?
            .contains(&permission);

        Ok(IsGrantedResponse { granted })
    }

    pub async fn belongs_to(
        &self,
        ctx: &RequestContext,
        req: BelongsToRequest,
    ) -> Result<BelongsToResponse, AppError> {
        require_id(req.user_id, "user")?;
        require_id(req.group_id, "group")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::BelongsTo, &Facts::subject(req.user_id))?;

        let belongs = self
            .ctx
            .repositories
            .user_groups
            .exists(req.user_id, req.group_id)
            .await
            .map_err(|e| AppError::storage("group membership check failure", e))?;

        Ok(BelongsToResponse { belongs })
    }
}
