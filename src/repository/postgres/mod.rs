//! PostgreSQL repositories (数据库访问层)
//!
//! Dynamic filters are assembled with [`QueryBuilder`]; every value goes
//! through a bind parameter and sort columns are checked against the
//! entity's whitelist before they reach the SQL text.

mod assignment;
mod group;
mod permission;
mod refresh_token;
mod user;

pub use assignment::{
    PgGroupPermissionsRepository, PgUserGroupsRepository, PgUserPermissionsRepository,
};
pub use group::PgGroupRepository;
pub use permission::PgPermissionRepository;
pub use refresh_token::PgRefreshTokenRepository;
pub use user::PgUserRepository;

use sqlx::{Encode, PgPool, Postgres, QueryBuilder, Type};
use std::sync::Arc;

use super::Repositories;
use crate::models::{
    criteria::{Pagination, Scalar, TimestampFilter, TimestampOp},
    patch::Patch,
};

pub(crate) type Builder = QueryBuilder<'static, Postgres>;

impl Repositories {
    pub fn postgres(db: PgPool) -> Self {
        Repositories {
            user: Arc::new(PgUserRepository::new(db.clone())),
            group: Arc::new(PgGroupRepository::new(db.clone())),
            permission: Arc::new(PgPermissionRepository::new(db.clone())),
            user_groups: Arc::new(PgUserGroupsRepository::new(db.clone())),
            user_permissions: Arc::new(PgUserPermissionsRepository::new(db.clone())),
            group_permissions: Arc::new(PgGroupPermissionsRepository::new(db.clone())),
            refresh_token: Arc::new(PgRefreshTokenRepository::new(db)),
        }
    }
}

/// `AND column = $n` or `AND column IN ($n, ...)`.
pub(crate) fn push_scalar<T>(qb: &mut Builder, column: &str, filter: Option<&Scalar<T>>)
where
    T: Clone + Send + 'static + Encode<'static, Postgres> + Type<Postgres>,
{
    match filter {
        None => {}
        Some(Scalar::Equal(value)) => {
            qb.push(" AND ").push(column).push(" = ").push_bind(value.clone());
        }
        Some(Scalar::In(values)) => {
            qb.push(" AND ").push(column).push(" IN (");
            let mut list = qb.separated(", ");
            for value in values {
                list.push_bind(value.clone());
            }
            list.push_unseparated(")");
        }
    }
}

pub(crate) fn push_bool(qb: &mut Builder, column: &str, filter: Option<bool>) {
    if let Some(value) = filter {
        qb.push(" AND ").push(column).push(" = ").push_bind(value);
    }
}

/// Negation wraps the predicate in `COALESCE(.., FALSE)` so a NULL column
/// matches a negated comparison, the same as the in-memory evaluation.
pub(crate) fn push_timestamp(qb: &mut Builder, column: &str, filter: Option<&TimestampFilter>) {
    let Some(filter) = filter else {
        return;
    };

    qb.push(" AND ");
    if filter.negation {
        qb.push("NOT COALESCE(");
    }
    qb.push("(").push(column);

    let first = filter.values.first().copied();
    let comparison = match filter.op {
        TimestampOp::Null => {
            qb.push(" IS NULL");
            None
        }
        TimestampOp::Equal => Some(" = "),
        TimestampOp::Greater => Some(" > "),
        TimestampOp::GreaterEqual => Some(" >= "),
        TimestampOp::Less => Some(" < "),
        TimestampOp::LessEqual => Some(" <= "),
        TimestampOp::In => {
            qb.push(" IN (");
            let mut list = qb.separated(", ");
            for value in &filter.values {
                list.push_bind(*value);
            }
            list.push_unseparated(")");
            None
        }
        TimestampOp::Between => {
            qb.push(" BETWEEN ")
                .push_bind(first)
                .push(" AND ")
                .push_bind(filter.values.get(1).copied());
            None
        }
    };
    if let Some(op) = comparison {
        qb.push(op).push_bind(first);
    }

    qb.push(")");
    if filter.negation {
        qb.push(", FALSE)");
    }
}

/// `ORDER BY`, `OFFSET` and `LIMIT`. Columns outside `sortable` are skipped.
pub(crate) fn push_pagination(
    qb: &mut Builder,
    page: &Pagination,
    sortable: &[&str],
    default_order: &str,
) {
    let sort: Vec<_> = page
        .sort
        .iter()
        .filter(|s| sortable.contains(&s.column.as_str()))
        .collect();

    qb.push(" ORDER BY ");
    if sort.is_empty() {
        qb.push(default_order);
    } else {
        let mut order = qb.separated(", ");
        for s in sort {
            order.push(s.column.as_str());
            order.push_unseparated(if s.ascending { " ASC" } else { " DESC" });
        }
    }

    if page.offset > 0 {
        qb.push(" OFFSET ")
            .push_bind(i64::try_from(page.offset).unwrap_or(i64::MAX));
    }
    if page.limit > 0 {
        qb.push(" LIMIT ")
            .push_bind(i64::try_from(page.limit).unwrap_or(i64::MAX));
    }
}

/// `, column = $n` for a present patch field. Returns whether anything was
/// pushed.
pub(crate) fn push_patch<T>(qb: &mut Builder, column: &str, patch: &Patch<T>) -> bool
where
    T: Clone + Send + 'static + Encode<'static, Postgres> + Type<Postgres>,
{
    match patch {
        Patch::Absent => false,
        Patch::Null => {
            qb.push(", ").push(column).push(" = NULL");
            true
        }
        Patch::Value(value) => {
            qb.push(", ").push(column).push(" = ").push_bind(value.clone());
            true
        }
    }
}
