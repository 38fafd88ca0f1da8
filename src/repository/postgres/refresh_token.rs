use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};

use super::{push_bool, push_pagination, push_patch, push_scalar, push_timestamp, Builder};
use crate::models::refresh_token::{
    NewRefreshToken, RefreshToken, RefreshTokenCriteria, RefreshTokenPatch,
};
use crate::repository::{RefreshTokenRepository, StorageResult};

pub struct PgRefreshTokenRepository {
    db: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn push_where(qb: &mut Builder, criteria: &RefreshTokenCriteria) {
    push_scalar(qb, "user_id", criteria.user_id.as_ref());
    push_bool(qb, "revoked", criteria.revoked);
    push_timestamp(qb, "expire_at", criteria.expire_at.as_ref());
    push_timestamp(qb, "last_used_at", criteria.last_used_at.as_ref());
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn find(&self, criteria: &RefreshTokenCriteria) -> StorageResult<Vec<RefreshToken>> {
        let mut qb = QueryBuilder::new("SELECT * FROM charon.refresh_token WHERE TRUE");
        push_where(&mut qb, criteria);
        push_pagination(
            &mut qb,
            &criteria.page,
            RefreshTokenCriteria::SORTABLE,
            "created_at",
        );

        let tokens = qb.build_query_as::<RefreshToken>().fetch_all(&self.db).await?;
        Ok(tokens)
    }

    async fn find_one_by_token(&self, token: &str) -> StorageResult<RefreshToken> {
        let token = sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM charon.refresh_token WHERE token = $1",
        )
        .bind(token)
        .fetch_one(&self.db)
        .await?;

        Ok(token)
    }

    async fn count(&self, criteria: &RefreshTokenCriteria) -> StorageResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM charon.refresh_token WHERE TRUE");
        push_where(&mut qb, criteria);

        let count = qb.build_query_scalar::<i64>().fetch_one(&self.db).await?;
        Ok(count)
    }

    async fn insert(&self, token: &NewRefreshToken) -> StorageResult<RefreshToken> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO charon.refresh_token (token, user_id, expire_at, notes, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.expire_at)
        .bind(&token.notes)
        .bind(token.created_by)
        .fetch_one(&self.db)
        .await?;

        Ok(token)
    }

    async fn update_one_by_token_and_user_id(
        &self,
        token: &str,
        user_id: i64,
        patch: &RefreshTokenPatch,
    ) -> StorageResult<RefreshToken> {
        let mut qb = QueryBuilder::new("UPDATE charon.refresh_token SET updated_at = NOW()");
        push_patch(&mut qb, "revoked", &patch.revoked);
        push_patch(&mut qb, "expire_at", &patch.expire_at);
        push_patch(&mut qb, "last_used_at", &patch.last_used_at);
        push_patch(&mut qb, "notes", &patch.notes);
        push_patch(&mut qb, "updated_by", &patch.updated_by);
        qb.push(" WHERE token = ")
            .push_bind(token.to_string())
            .push(" AND user_id = ")
            .push_bind(user_id)
            .push(" RETURNING *");

        let token = qb.build_query_as::<RefreshToken>().fetch_one(&self.db).await?;
        Ok(token)
    }
}
