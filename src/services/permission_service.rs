//! 权限目录服务

use super::{invalid_criteria, parse_permissions, ServiceContext};
use crate::{
    auth::{
        actor::RequestContext,
        firewall::{self, Facts, Operation},
        RegistryError,
    },
    error::AppError,
    models::{
        criteria::{Pagination, Scalar},
        permission::*,
    },
};

pub struct PermissionManager {
    ctx: ServiceContext,
}

impl PermissionManager {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn register(
        &self,
        ctx: &RequestContext,
        req: RegisterPermissionsRequest,
    ) -> Result<RegisterOutcome, AppError> {
        let permissions = parse_permissions(&req.permissions)?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::RegisterPermissions, &Facts::none())?;

        self.ctx
            .registry
            .register(&permissions)
            .await
            .map_err(|e| match e {
                RegistryError::Storage(e) => {
                    AppError::storage("permissions cannot be registered", e)
                }
                invalid => AppError::InvalidArgument(invalid.to_string()),
            })
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        req: ListPermissionsRequest,
    ) -> Result<ListPermissionsResponse, AppError> {
        let criteria = PermissionCriteria {
            subsystem: req.subsystem.map(Scalar::Equal),
            module: req.module.map(Scalar::Equal),
            action: req.action.map(Scalar::Equal),
            page: Pagination::from_request(req.offset, req.limit, req.sort),
            ..Default::default()
        };
        criteria.validate().map_err(invalid_criteria)?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ListPermissions, &Facts::none())?;

        let entities = self
            .ctx
            .repositories
            .permission
            .find(&criteria)
            .await
            .map_err(|e| AppError::storage("permissions cannot be listed", e))?;

        let permissions = entities
            .iter()
            .map(|entity| {
                entity
                    .permission()
                    .map(|p| p.to_string())
                    .map_err(|e| AppError::internal("malformed permission in catalog", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListPermissionsResponse { permissions })
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        req: PermissionIdRequest,
    ) -> Result<PermissionResponse, AppError> {
        if req.id < 1 {
            return Err(AppError::invalid_argument("permission id must be positive"));
        }

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::GetPermission, &Facts::none())?;

        let entity = self
            .ctx
            .repositories
            .permission
            .find_one_by_id(req.id)
            .await
            .map_err(|e| AppError::storage("permission does not exist", e))?;

        let permission = entity
            .permission()
            .map_err(|e| AppError::internal("malformed permission in catalog", e))?;

        Ok(PermissionResponse {
            permission: permission.to_string(),
        })
    }
}
