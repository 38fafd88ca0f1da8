use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};

use super::{push_pagination, push_patch, push_scalar, Builder};
use crate::models::group::{Group, GroupCriteria, GroupPatch, NewGroup};
use crate::repository::{GroupRepository, StorageResult};

pub struct PgGroupRepository {
    db: PgPool,
}

impl PgGroupRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn push_where(qb: &mut Builder, criteria: &GroupCriteria) {
    push_scalar(qb, "id", criteria.id.as_ref());
    push_scalar(qb, "name", criteria.name.as_ref());
    push_scalar(qb, "created_by", criteria.created_by.as_ref());
}

fn push_set(qb: &mut Builder, patch: &GroupPatch) {
    qb.push(" SET updated_at = NOW()");
    push_patch(qb, "name", &patch.name);
    push_patch(qb, "description", &patch.description);
    push_patch(qb, "updated_by", &patch.updated_by);
}

fn push_values(qb: &mut Builder, group: &NewGroup) {
    qb.push("INSERT INTO charon.\"group\" (name, description, created_by) VALUES (")
        .push_bind(group.name.clone())
        .push(", ")
        .push_bind(group.description.clone())
        .push(", ")
        .push_bind(group.created_by)
        .push(")");
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn find(&self, criteria: &GroupCriteria) -> StorageResult<Vec<Group>> {
        let mut qb = QueryBuilder::new("SELECT * FROM charon.\"group\" WHERE TRUE");
        push_where(&mut qb, criteria);
        push_pagination(&mut qb, &criteria.page, GroupCriteria::SORTABLE, "id");

        let groups = qb.build_query_as::<Group>().fetch_all(&self.db).await?;
        Ok(groups)
    }

    async fn find_one_by_id(&self, id: i64) -> StorageResult<Group> {
        let group = sqlx::query_as::<_, Group>("SELECT * FROM charon.\"group\" WHERE id = $1")
            .bind(id)
            .fetch_one(&self.db)
            .await?;

        Ok(group)
    }

    async fn find_by_user_id(&self, user_id: i64) -> StorageResult<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.*
            FROM charon."group" g
            JOIN charon.user_groups ug ON ug.group_id = g.id
            WHERE ug.user_id = $1
            ORDER BY g.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(groups)
    }

    async fn count(&self, criteria: &GroupCriteria) -> StorageResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM charon.\"group\" WHERE TRUE");
        push_where(&mut qb, criteria);

        let count = qb.build_query_scalar::<i64>().fetch_one(&self.db).await?;
        Ok(count)
    }

    async fn insert(&self, group: &NewGroup) -> StorageResult<Group> {
        let mut qb = QueryBuilder::new("");
        push_values(&mut qb, group);
        qb.push(" RETURNING *");

        let group = qb.build_query_as::<Group>().fetch_one(&self.db).await?;
        Ok(group)
    }

    async fn upsert(&self, group: &NewGroup, patch: &GroupPatch) -> StorageResult<Group> {
        let mut qb = QueryBuilder::new("");
        push_values(&mut qb, group);
        qb.push(" ON CONFLICT (name) DO UPDATE");
        push_set(&mut qb, patch);
        qb.push(" RETURNING *");

        let group = qb.build_query_as::<Group>().fetch_one(&self.db).await?;
        Ok(group)
    }

    async fn update_one_by_id(&self, id: i64, patch: &GroupPatch) -> StorageResult<Group> {
        let mut qb = QueryBuilder::new("UPDATE charon.\"group\"");
        push_set(&mut qb, patch);
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let group = qb.build_query_as::<Group>().fetch_one(&self.db).await?;
        Ok(group)
    }

    async fn delete_one_by_id(&self, id: i64) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM charon.\"group\" WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
