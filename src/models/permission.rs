//! Permission catalog and assignment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::criteria::{CriteriaError, Pagination, Scalar, Sort};
use crate::auth::permission::{Permission, PermissionParseError};

/// Persisted permission row
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PermissionEntity {
    pub id: i64,
    pub subsystem: String,
    pub module: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PermissionEntity {
    pub fn permission(&self) -> Result<Permission, PermissionParseError> {
        Permission::new(self.subsystem.clone(), self.module.clone(), self.action.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionCriteria {
    pub id: Option<Scalar<i64>>,
    pub subsystem: Option<Scalar<String>>,
    pub module: Option<Scalar<String>>,
    pub action: Option<Scalar<String>>,
    pub page: Pagination,
}

impl PermissionCriteria {
    pub const SORTABLE: &'static [&'static str] =
        &["id", "subsystem", "module", "action", "created_at"];

    pub fn validate(&self) -> Result<(), CriteriaError> {
        if let Some(id) = &self.id {
            id.validate()?;
        }
        for scalar in [&self.subsystem, &self.module, &self.action].into_iter().flatten() {
            scalar.validate()?;
        }
        self.page.validate(Self::SORTABLE)
    }

    pub fn matches(&self, entity: &PermissionEntity) -> bool {
        self.id.as_ref().map_or(true, |f| f.matches(&entity.id))
            && self.subsystem.as_ref().map_or(true, |f| f.matches(&entity.subsystem))
            && self.module.as_ref().map_or(true, |f| f.matches(&entity.module))
            && self.action.as_ref().map_or(true, |f| f.matches(&entity.action))
    }
}

/// Outcome of reconciling a declared permission set against the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOutcome {
    pub created: i64,
    pub untouched: i64,
    pub removed: i64,
}

/// Outcome of an assignment `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOutcome {
    pub created: i64,
    pub removed: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPermissionsRequest {
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPermissionsRequest {
    pub subsystem: Option<String>,
    pub module: Option<String>,
    pub action: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    #[serde(default)]
    pub sort: Vec<Sort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionIdRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPermissionsResponse {
    pub permissions: Vec<String>,
}
