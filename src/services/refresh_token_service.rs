//! 刷新令牌管理服务
//!
//! Disable and revoke are two-phase: the row is updated first, then every
//! session minted from the token is deleted. Sessions that survive the
//! second phase are rejected by the actor resolver on their next use.

use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{invalid_criteria, require_id, ServiceContext};
use crate::{
    auth::{
        actor::{Actor, RequestContext},
        firewall::{self, Facts, Operation},
        permission::REFRESH_TOKEN_CAN_RETRIEVE_AS_STRANGER,
        session::SessionError,
    },
    error::AppError,
    models::{
        criteria::{Pagination, Scalar},
        patch::Patch,
        refresh_token::*,
    },
    repository::StorageError,
};

/// 64 hex chars: SHA-256 over 64 random bytes.
fn generate_token() -> String {
    let mut seed = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut seed);
    hex::encode(Sha256::digest(seed))
}

pub struct RefreshTokenManager {
    ctx: ServiceContext,
}

impl RefreshTokenManager {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        req: CreateRefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, AppError> {
        if req.expire_at.is_some_and(|at| at <= Utc::now()) {
            return Err(AppError::invalid_argument("expire_at must be in the future"));
        }

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::CreateRefreshToken, &Facts::none())?;
        let Some(user_id) = actor.id() else {
            return Err(AppError::unauthenticated(
                "refresh token requires an authenticated user",
            ));
        };

        let token = self
            .ctx
            .repositories
            .refresh_token
            .insert(&NewRefreshToken {
                token: generate_token(),
                user_id,
                expire_at: req.expire_at,
                notes: req.notes,
                created_by: Some(user_id),
            })
            .await
            .map_err(|e| AppError::storage("refresh token cannot be created", e))?;

        info!(user_id, "Refresh token created");

        Ok(RefreshTokenResponse {
            refresh_token: token.into(),
        })
    }

    pub async fn disable(
        &self,
        ctx: &RequestContext,
        req: RefreshTokenKeyRequest,
    ) -> Result<RefreshTokenResponse, AppError> {
        self.invalidate(ctx, req, Operation::DisableRefreshToken).await
    }

    /// Like disable, and additionally expires the token immediately.
    pub async fn revoke(
        &self,
        ctx: &RequestContext,
        req: RefreshTokenKeyRequest,
    ) -> Result<RefreshTokenResponse, AppError> {
        self.invalidate(ctx, req, Operation::RevokeRefreshToken).await
    }

    async fn invalidate(
        &self,
        ctx: &RequestContext,
        req: RefreshTokenKeyRequest,
        operation: Operation,
    ) -> Result<RefreshTokenResponse, AppError> {
        if req.token.is_empty() {
            return Err(AppError::invalid_argument("empty refresh token"));
        }
        require_id(req.user_id, "user")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, operation, &Facts::owned_by(Some(req.user_id)))?;

        let mut patch = RefreshTokenPatch {
            revoked: Patch::Value(true),
            updated_by: actor.id().into(),
            ..Default::default()
        };
        if operation == Operation::RevokeRefreshToken {
            patch.expire_at = Patch::Value(Utc::now());
        }

        let token = self
            .ctx
            .repositories
            .refresh_token
            .update_one_by_token_and_user_id(&req.token, req.user_id, &patch)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => AppError::not_found("refresh token does not exist"),
                other => AppError::storage("refresh token cannot be updated", other),
            })?;

        let sessions = match self.ctx.sessions.delete(None, Some(&req.token)).await {
            Ok(count) => count,
            Err(SessionError::NotFound) => 0,
            Err(e) => return Err(AppError::internal("bound sessions removal failure", e)),
        };

        info!(
            user_id = req.user_id,
            operation = operation.as_str(),
            sessions,
            "Refresh token invalidated"
        );

        Ok(RefreshTokenResponse {
            refresh_token: token.into(),
        })
    }

    fn force_list_criteria(actor: &Actor, req: &mut ListRefreshTokensRequest) {
        if actor.is_local() || actor.is_superuser() {
            return;
        }
        if !actor.has(&REFRESH_TOKEN_CAN_RETRIEVE_AS_STRANGER) {
            req.user_id = actor.id();
        }
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        mut req: ListRefreshTokensRequest,
    ) -> Result<ListRefreshTokensResponse, AppError> {
        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ListRefreshTokens, &Facts::owned_by(req.user_id))?;
        Self::force_list_criteria(&actor, &mut req);

        let criteria = RefreshTokenCriteria {
            user_id: req.user_id.map(Scalar::Equal),
            revoked: req.revoked,
            expire_at: req.expire_at,
            last_used_at: req.last_used_at,
            page: Pagination::from_request(req.offset, req.limit, req.sort),
        };
        criteria.validate().map_err(invalid_criteria)?;

        let tokens = self
            .ctx
            .repositories
            .refresh_token
            .find(&criteria)
            .await
            .map_err(|e| AppError::storage("refresh tokens cannot be listed", e))?;

        Ok(ListRefreshTokensResponse {
            refresh_tokens: tokens.into_iter().map(Into::into).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let a = generate_token();
        let b = generate_token();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
