use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};

use super::{push_bool, push_pagination, push_patch, push_scalar, push_timestamp, Builder};
use crate::models::user::{NewUser, User, UserCriteria, UserPatch};
use crate::repository::{StorageResult, UserRepository};

pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn push_where(qb: &mut Builder, criteria: &UserCriteria) {
    push_scalar(qb, "id", criteria.id.as_ref());
    push_scalar(qb, "username", criteria.username.as_ref());
    push_bool(qb, "is_superuser", criteria.is_superuser);
    push_bool(qb, "is_active", criteria.is_active);
    push_bool(qb, "is_confirmed", criteria.is_confirmed);
    push_bool(qb, "is_staff", criteria.is_staff);
    push_scalar(qb, "created_by", criteria.created_by.as_ref());
    push_timestamp(qb, "created_at", criteria.created_at.as_ref());
    push_timestamp(qb, "last_login_at", criteria.last_login_at.as_ref());
}

fn push_set(qb: &mut Builder, patch: &UserPatch) {
    qb.push(" SET updated_at = NOW()");
    push_patch(qb, "username", &patch.username);
    push_patch(qb, "password", &patch.password);
    push_patch(qb, "first_name", &patch.first_name);
    push_patch(qb, "last_name", &patch.last_name);
    push_patch(qb, "is_superuser", &patch.is_superuser);
    push_patch(qb, "is_active", &patch.is_active);
    push_patch(qb, "is_confirmed", &patch.is_confirmed);
    push_patch(qb, "is_staff", &patch.is_staff);
    push_patch(qb, "confirmation_token", &patch.confirmation_token);
    push_patch(qb, "updated_by", &patch.updated_by);
}

fn push_values(qb: &mut Builder, user: &NewUser) {
    qb.push(
        "INSERT INTO charon.\"user\" (username, password, first_name, last_name, is_superuser, \
         is_active, is_confirmed, is_staff, confirmation_token, created_by) VALUES (",
    );
    let mut values = qb.separated(", ");
    values
        .push_bind(user.username.clone())
        .push_bind(user.password.clone())
        .push_bind(user.first_name.clone())
        .push_bind(user.last_name.clone())
        .push_bind(user.is_superuser)
        .push_bind(user.is_active)
        .push_bind(user.is_confirmed)
        .push_bind(user.is_staff)
        .push_bind(user.confirmation_token.clone())
        .push_bind(user.created_by);
    values.push_unseparated(")");
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find(&self, criteria: &UserCriteria) -> StorageResult<Vec<User>> {
        let mut qb = QueryBuilder::new("SELECT * FROM charon.\"user\" WHERE TRUE");
        push_where(&mut qb, criteria);
        push_pagination(&mut qb, &criteria.page, UserCriteria::SORTABLE, "id");

        let users = qb.build_query_as::<User>().fetch_all(&self.db).await?;
        Ok(users)
    }

    async fn find_one_by_id(&self, id: i64) -> StorageResult<User> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM charon.\"user\" WHERE id = $1")
            .bind(id)
            .fetch_one(&self.db)
            .await?;

        Ok(user)
    }

    async fn find_one_by_username(&self, username: &str) -> StorageResult<User> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM charon.\"user\" WHERE username = $1")
            .bind(username)
            .fetch_one(&self.db)
            .await?;

        Ok(user)
    }

    async fn count(&self, criteria: &UserCriteria) -> StorageResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM charon.\"user\" WHERE TRUE");
        push_where(&mut qb, criteria);

        let count = qb.build_query_scalar::<i64>().fetch_one(&self.db).await?;
        Ok(count)
    }

    async fn exists(&self, id: i64) -> StorageResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM charon.\"user\" WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn insert(&self, user: &NewUser) -> StorageResult<User> {
        let mut qb = QueryBuilder::new("");
        push_values(&mut qb, user);
        qb.push(" RETURNING *");

        let user = qb.build_query_as::<User>().fetch_one(&self.db).await?;
        Ok(user)
    }

    async fn upsert(&self, user: &NewUser, patch: &UserPatch) -> StorageResult<User> {
        let mut qb = QueryBuilder::new("");
        push_values(&mut qb, user);
        qb.push(" ON CONFLICT (username) DO UPDATE");
        push_set(&mut qb, patch);
        qb.push(" RETURNING *");

        let user = qb.build_query_as::<User>().fetch_one(&self.db).await?;
        Ok(user)
    }

    async fn update_one_by_id(&self, id: i64, patch: &UserPatch) -> StorageResult<User> {
        let mut qb = QueryBuilder::new("UPDATE charon.\"user\"");
        push_set(&mut qb, patch);
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let user = qb.build_query_as::<User>().fetch_one(&self.db).await?;
        Ok(user)
    }

    async fn update_last_login_at(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE charon.\"user\" SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(())
    }

    async fn delete_one_by_id(&self, id: i64) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM charon.\"user\" WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
