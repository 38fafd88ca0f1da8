//! 用户组管理服务

use tracing::info;

use super::{invalid_criteria, parse_permissions, require_id, ServiceContext};
use crate::{
    auth::{
        actor::RequestContext,
        firewall::{self, Facts, Operation},
    },
    error::AppError,
    models::{
        criteria::Pagination,
        group::*,
        patch::Patch,
        permission::{ListPermissionsResponse, SetOutcome},
        DeleteResponse,
    },
    repository::StorageError,
};

const NAME_MIN_LENGTH: usize = 3;

fn check_name(name: &str) -> Result<(), AppError> {
    if name.chars().count() < NAME_MIN_LENGTH {
        return Err(AppError::invalid_argument("group name is too short"));
    }
    Ok(())
}

fn translate_write(msg: &str, err: StorageError) -> AppError {
    match err {
        StorageError::UniqueViolation(_) => {
            AppError::already_exists("group with given name already exists")
        }
        other => AppError::storage(msg, other),
    }
}

pub struct GroupManager {
    ctx: ServiceContext,
}

impl GroupManager {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        req: CreateGroupRequest,
    ) -> Result<GroupResponse, AppError> {
        check_name(&req.name)?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::CreateGroup, &Facts::none())?;

        let group = self
            .ctx
            .repositories
            .group
            .insert(&NewGroup {
                name: req.name,
                description: req.description,
                created_by: actor.id(),
            })
            .await
            .map_err(|e| translate_write("group cannot be created", e))?;

        info!(group_id = group.id, name = %group.name, "Group created");

        Ok(GroupResponse {
            group: group.into(),
        })
    }

    pub async fn modify(
        &self,
        ctx: &RequestContext,
        req: ModifyGroupRequest,
    ) -> Result<GroupResponse, AppError> {
        require_id(req.id, "group")?;
        if req.name.is_none() && req.description.is_absent() {
            return Err(AppError::invalid_argument("name or description is required"));
        }
        if let Some(name) = &req.name {
            check_name(name)?;
        }

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ModifyGroup, &Facts::none())?;

        let patch = GroupPatch {
            name: req.name.map_or(Patch::Absent, Patch::Value),
            description: req.description,
            updated_by: actor.id().into(),
        };

        let group = self
            .ctx
            .repositories
            .group
            .update_one_by_id(req.id, &patch)
            .await
            .map_err(|e| translate_write("group cannot be modified", e))?;

        info!(group_id = group.id, "Group modified");

        Ok(GroupResponse {
            group: group.into(),
        })
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        req: GroupIdRequest,
    ) -> Result<GroupResponse, AppError> {
        require_id(req.id, "group")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::GetGroup, &Facts::none())?;

        let group = self
            .ctx
            .repositories
            .group
            .find_one_by_id(req.id)
            .await
            .map_err(|e| AppError::storage("group does not exist", e))?;

        Ok(GroupResponse {
            group: group.into(),
        })
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        req: ListGroupsRequest,
    ) -> Result<ListGroupsResponse, AppError> {
        let criteria = GroupCriteria {
            page: Pagination::from_request(req.offset, req.limit, req.sort),
            ..Default::default()
        };
        criteria.validate().map_err(invalid_criteria)?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ListGroups, &Facts::none())?;

        let groups = self
            .ctx
            .repositories
            .group
            .find(&criteria)
            .await
            .map_err(|e| AppError::storage("groups cannot be listed", e))?;

        Ok(ListGroupsResponse {
            groups: groups.into_iter().map(Into::into).collect(),
        })
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        req: GroupIdRequest,
    ) -> Result<DeleteResponse, AppError> {
        require_id(req.id, "group")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::DeleteGroup, &Facts::none())?;

        let affected = self
            .ctx
            .repositories
            .group
            .delete_one_by_id(req.id)
            .await
            .map_err(|e| match e {
                StorageError::ForeignKeyViolation(constraint) => {
                    tracing::debug!(constraint = %constraint, "group still referenced");
                    AppError::failed_precondition("group is still referenced by other entities")
                }
                other => AppError::storage("group cannot be deleted", other),
            })?;
        if affected == 0 {
            return Err(AppError::not_found("group does not exist"));
        }

        info!(group_id = req.id, "Group deleted");

        Ok(DeleteResponse { affected })
    }

    pub async fn list_permissions(
        &self,
        ctx: &RequestContext,
        req: GroupIdRequest,
    ) -> Result<ListPermissionsResponse, AppError> {
        require_id(req.id, "group")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ListGroupPermissions, &Facts::none())?;

        let permissions = self
            .ctx
            .repositories
            .permission
            .find_by_group_id(req.id)
            .await
            .map_err(|e| AppError::storage("group permissions cannot be listed", e))?;

        Ok(ListPermissionsResponse {
            permissions: permissions.to_strings(),
        })
    }

    pub async fn set_permissions(
        &self,
        ctx: &RequestContext,
        req: SetGroupPermissionsRequest,
    ) -> Result<SetOutcome, AppError> {
        require_id(req.group_id, "group")?;
        let permissions = parse_permissions(&req.permissions)?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::SetGroupPermissions, &Facts::none())?;

        let outcome = self
            .ctx
            .repositories
            .group_permissions
            .set(req.group_id, &permissions, req.force, actor.id())
            .await
            .map_err(|e| AppError::storage("group permissions cannot be set", e))?;

        info!(
            group_id = req.group_id,
            created = outcome.created,
            removed = outcome.removed,
            "Group permissions set"
        );

        Ok(outcome)
    }
}
