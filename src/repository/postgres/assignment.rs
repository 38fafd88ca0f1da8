//! Membership and grant tables. Every `set` is a diff applied in one
//! transaction: rows outside the desired set are deleted, missing ones
//! inserted, and the affected row counts reported.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::permission::columns;
use crate::auth::permission::Permissions;
use crate::models::permission::SetOutcome;
use crate::repository::{
    GroupPermissionsRepository, StorageError, StorageResult, UserGroupsRepository,
    UserPermissionsRepository,
};

/// Fails with the owner's foreign key when the owning row does not exist.
async fn ensure_owner(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    id: i64,
    constraint: &str,
) -> StorageResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(&format!(
        "SELECT EXISTS(SELECT 1 FROM charon.{table} WHERE id = $1)"
    ))
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;

    if exists {
        Ok(())
    } else {
        Err(StorageError::ForeignKeyViolation(constraint.to_string()))
    }
}

/// Grant table layout shared by `user_permissions` and `group_permissions`.
struct GrantTable {
    table: &'static str,
    owner_column: &'static str,
    owner_table: &'static str,
}

static USER_PERMISSIONS: GrantTable = GrantTable {
    table: "user_permissions",
    owner_column: "user_id",
    owner_table: "\"user\"",
};

static GROUP_PERMISSIONS: GrantTable = GrantTable {
    table: "group_permissions",
    owner_column: "group_id",
    owner_table: "\"group\"",
};

impl GrantTable {
    async fn set(
        &self,
        db: &PgPool,
        owner_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        let GrantTable {
            table,
            owner_column,
            owner_table,
        } = self;
        let mut tx = db.begin().await?;

        ensure_owner(&mut tx, owner_table, owner_id, &format!("{table}_{owner_column}_fkey")).await?;

        let (subsystems, modules, actions) = columns(permissions);

        if force {
            sqlx::query(
                r#"
                INSERT INTO charon.permission (subsystem, module, action)
                SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[])
                ON CONFLICT (subsystem, module, action) DO NOTHING
                "#,
            )
            .bind(&subsystems)
            .bind(&modules)
            .bind(&actions)
            .execute(&mut *tx)
            .await?;
        }

        let removed = sqlx::query(&format!(
            r#"
            DELETE FROM charon.{table}
            WHERE {owner_column} = $1
              AND (permission_subsystem, permission_module, permission_action) NOT IN (
                  SELECT * FROM UNNEST($2::TEXT[], $3::TEXT[], $4::TEXT[])
              )
            "#
        ))
        .bind(owner_id)
        .bind(&subsystems)
        .bind(&modules)
        .bind(&actions)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let created = sqlx::query(&format!(
            r#"
            INSERT INTO charon.{table}
                ({owner_column}, permission_subsystem, permission_module, permission_action, created_by)
            SELECT $1, s, m, a, $5 FROM UNNEST($2::TEXT[], $3::TEXT[], $4::TEXT[]) AS t (s, m, a)
            ON CONFLICT ({owner_column}, permission_subsystem, permission_module, permission_action)
            DO NOTHING
            "#
        ))
        .bind(owner_id)
        .bind(&subsystems)
        .bind(&modules)
        .bind(&actions)
        .bind(actor_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(SetOutcome {
            created: created as i64,
            removed: removed as i64,
        })
    }
}

pub struct PgUserGroupsRepository {
    db: PgPool,
}

impl PgUserGroupsRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserGroupsRepository for PgUserGroupsRepository {
    async fn exists(&self, user_id: i64, group_id: i64) -> StorageResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM charon.user_groups WHERE user_id = $1 AND group_id = $2)",
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn set(
        &self,
        user_id: i64,
        group_ids: &[i64],
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        let mut tx = self.db.begin().await?;

        ensure_owner(&mut tx, "\"user\"", user_id, "user_groups_user_id_fkey").await?;

        let removed = sqlx::query(
            "DELETE FROM charon.user_groups WHERE user_id = $1 AND NOT (group_id = ANY($2))",
        )
        .bind(user_id)
        .bind(group_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let created = sqlx::query(
            r#"
            INSERT INTO charon.user_groups (user_id, group_id, created_by)
            SELECT DISTINCT $1, g, $3 FROM UNNEST($2::BIGINT[]) AS t (g)
            ON CONFLICT (user_id, group_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(group_ids)
        .bind(actor_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(SetOutcome {
            created: created as i64,
            removed: removed as i64,
        })
    }
}

pub struct PgUserPermissionsRepository {
    db: PgPool,
}

impl PgUserPermissionsRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserPermissionsRepository for PgUserPermissionsRepository {
    async fn set(
        &self,
        user_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        USER_PERMISSIONS
            .set(&self.db, user_id, permissions, force, actor_id)
            .await
    }
}

pub struct PgGroupPermissionsRepository {
    db: PgPool,
}

impl PgGroupPermissionsRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GroupPermissionsRepository for PgGroupPermissionsRepository {
    async fn set(
        &self,
        group_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        GROUP_PERMISSIONS
            .set(&self.db, group_id, permissions, force, actor_id)
            .await
    }
}
