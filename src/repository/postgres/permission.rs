use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};

use super::{push_pagination, push_scalar, Builder};
use crate::auth::permission::{Permission, Permissions};
use crate::models::permission::{PermissionCriteria, PermissionEntity, RegisterOutcome};
use crate::repository::{PermissionRepository, StorageResult};

pub struct PgPermissionRepository {
    db: PgPool,
}

impl PgPermissionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn push_where(qb: &mut Builder, criteria: &PermissionCriteria) {
    push_scalar(qb, "id", criteria.id.as_ref());
    push_scalar(qb, "subsystem", criteria.subsystem.as_ref());
    push_scalar(qb, "module", criteria.module.as_ref());
    push_scalar(qb, "action", criteria.action.as_ref());
}

/// Rows violating the non-empty checks cannot exist; they are skipped.
pub(super) fn collect_permissions(rows: Vec<(String, String, String)>) -> Permissions {
    rows.into_iter()
        .filter_map(|(subsystem, module, action)| {
            Permission::new(subsystem, module, action)
                .map_err(|e| tracing::warn!(error = %e, "Skipping malformed permission row"))
                .ok()
        })
        .collect()
}

/// Column-wise arrays for `UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[])`.
pub(super) fn columns(permissions: &Permissions) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut subsystems = Vec::with_capacity(permissions.len());
    let mut modules = Vec::with_capacity(permissions.len());
    let mut actions = Vec::with_capacity(permissions.len());
    for permission in permissions.iter() {
        subsystems.push(permission.subsystem().to_string());
        modules.push(permission.module().to_string());
        actions.push(permission.action().to_string());
    }
    (subsystems, modules, actions)
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    async fn find(&self, criteria: &PermissionCriteria) -> StorageResult<Vec<PermissionEntity>> {
        let mut qb = QueryBuilder::new("SELECT * FROM charon.permission WHERE TRUE");
        push_where(&mut qb, criteria);
        push_pagination(&mut qb, &criteria.page, PermissionCriteria::SORTABLE, "id");

        let rows = qb.build_query_as::<PermissionEntity>().fetch_all(&self.db).await?;
        Ok(rows)
    }

    async fn find_one_by_id(&self, id: i64) -> StorageResult<PermissionEntity> {
        let row =
            sqlx::query_as::<_, PermissionEntity>("SELECT * FROM charon.permission WHERE id = $1")
                .bind(id)
                .fetch_one(&self.db)
                .await?;

        Ok(row)
    }

    async fn count(&self, criteria: &PermissionCriteria) -> StorageResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM charon.permission WHERE TRUE");
        push_where(&mut qb, criteria);

        let count = qb.build_query_scalar::<i64>().fetch_one(&self.db).await?;
        Ok(count)
    }

    async fn find_by_user_id(&self, user_id: i64) -> StorageResult<Permissions> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT permission_subsystem, permission_module, permission_action
            FROM charon.user_permissions
            WHERE user_id = $1
            UNION
            SELECT gp.permission_subsystem, gp.permission_module, gp.permission_action
            FROM charon.group_permissions gp
            JOIN charon.user_groups ug ON ug.group_id = gp.group_id
            WHERE ug.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(collect_permissions(rows))
    }

    async fn find_by_group_id(&self, group_id: i64) -> StorageResult<Permissions> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT permission_subsystem, permission_module, permission_action
            FROM charon.group_permissions
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;

        Ok(collect_permissions(rows))
    }

    async fn register(
        &self,
        subsystem: &str,
        permissions: &Permissions,
    ) -> StorageResult<RegisterOutcome> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, subsystem, module, action FROM charon.permission WHERE subsystem = $1 FOR UPDATE",
        )
        .bind(subsystem)
        .fetch_all(&mut *tx)
        .await?;

        let mut stale = Vec::new();
        let mut existing = Permissions::new();
        for (id, subsystem, module, action) in current {
            match Permission::new(subsystem, module, action) {
                Ok(p) if permissions.contains(&p) => {
                    existing.insert(p);
                }
                _ => stale.push(id),
            }
        }

        let missing: Permissions = permissions
            .iter()
            .filter(|p| !existing.contains(p))
            .cloned()
            .collect();
        let (subsystems, modules, actions) = columns(&missing);
        let created = sqlx::query(
            r#"
            INSERT INTO charon.permission (subsystem, module, action)
            SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[])
            ON CONFLICT (subsystem, module, action) DO NOTHING
            "#,
        )
        .bind(subsystems)
        .bind(modules)
        .bind(actions)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // grants of removed permissions go with them (ON DELETE CASCADE)
        let removed = sqlx::query("DELETE FROM charon.permission WHERE id = ANY($1)")
            .bind(stale)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(RegisterOutcome {
            created: created as i64,
            untouched: existing.len() as i64,
            removed: removed as i64,
        })
    }
}
