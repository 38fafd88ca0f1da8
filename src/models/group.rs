//! Group domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::criteria::{CriteriaError, Pagination, Scalar, Sort};
use super::patch::Patch;

/// Group
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub name: Patch<String>,
    pub description: Patch<String>,
    pub updated_by: Patch<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupCriteria {
    pub id: Option<Scalar<i64>>,
    pub name: Option<Scalar<String>>,
    pub created_by: Option<Scalar<i64>>,
    pub page: Pagination,
}

impl GroupCriteria {
    pub const SORTABLE: &'static [&'static str] = &["id", "name", "created_at", "updated_at"];

    pub fn validate(&self) -> Result<(), CriteriaError> {
        for scalar in [&self.id, &self.created_by].into_iter().flatten() {
            scalar.validate()?;
        }
        if let Some(name) = &self.name {
            name.validate()?;
        }
        self.page.validate(Self::SORTABLE)
    }

    pub fn matches(&self, group: &Group) -> bool {
        self.id.as_ref().map_or(true, |f| f.matches(&group.id))
            && self.name.as_ref().map_or(true, |f| f.matches(&group.name))
            && self
                .created_by
                .as_ref()
                .map_or(true, |f| f.matches_opt(group.created_by.as_ref()))
    }
}

/// Group as exposed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<i64>,
}

impl From<Group> for GroupMessage {
    fn from(group: Group) -> Self {
        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            created_at: group.created_at,
            created_by: group.created_by,
            updated_at: group.updated_at,
            updated_by: group.updated_by,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModifyGroupRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Patch<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupIdRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListGroupsRequest {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    #[serde(default)]
    pub sort: Vec<Sort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupPermissionsRequest {
    pub group_id: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub group: GroupMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListGroupsResponse {
    pub groups: Vec<GroupMessage>,
}
