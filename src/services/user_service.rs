//! 用户管理服务

use tracing::info;
use uuid::Uuid;

use super::{invalid_criteria, parse_permissions, require_id, ServiceContext};
use crate::{
    auth::{
        actor::{Actor, RequestContext},
        firewall::{self, Facts, Operation},
        permission::*,
        PasswordHasher,
    },
    error::{AppError, Code},
    models::{
        criteria::{Pagination, Scalar},
        patch::Patch,
        permission::{ListPermissionsResponse, SetOutcome},
        user::*,
        DeleteResponse,
    },
    repository::StorageError,
};

pub struct UserManager {
    ctx: ServiceContext,
}

impl UserManager {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn find_user(&self, id: i64) -> Result<User, AppError> {
        self.ctx
            .repositories
            .user
            .find_one_by_id(id)
            .await
            .map_err(|e| AppError::storage("user does not exist", e))
    }

    fn check_username(&self, username: &str) -> Result<(), AppError> {
        if username.chars().count() < self.ctx.security.username_min_length {
            return Err(AppError::invalid_argument("username is too short"));
        }
        Ok(())
    }

    fn check_plain_password(&self, password: &str) -> Result<(), AppError> {
        if password.chars().count() < self.ctx.security.password_min_length {
            return Err(AppError::invalid_argument("password is too short"));
        }
        Ok(())
    }

    /// Resolves the actor of a create request. A superuser may be created
    /// without an actor while no account exists yet.
    async fn creator(
        &self,
        ctx: &RequestContext,
        req: &CreateUserRequest,
    ) -> Result<Option<Actor>, AppError> {
        match self.ctx.resolver.resolve(ctx).await {
            Ok(actor) => Ok(Some(actor)),
            Err(e) if req.is_superuser && e.code() == Code::Unauthenticated => {
                let count = self
                    .ctx
                    .repositories
                    .user
                    .count(&UserCriteria::default())
                    .await
                    .map_err(|e| AppError::storage("user count failure", e))?;
                if count > 0 {
                    return Err(AppError::already_exists(
                        "initial superuser account already exists",
                    ));
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 创建用户
    pub async fn create(
        &self,
        ctx: &RequestContext,
        req: CreateUserRequest,
    ) -> Result<UserResponse, AppError> {
        self.check_username(&req.username)?;

        let secure_password = req.secure_password.as_deref().filter(|s| !s.is_empty());
        if secure_password.is_none() {
            self.check_plain_password(&req.plain_password)?;
        }

        let actor = self.creator(ctx, &req).await?;
        match &actor {
            Some(actor) => firewall::check(
                actor,
                Operation::CreateUser,
                &Facts::none()
                    .requesting(Some(req.is_superuser), Some(req.is_staff))
                    .with_secure_password(secure_password.is_some()),
            )?,
            None if secure_password.is_some() => {
                return Err(AppError::permission_denied(
                    "only a superuser can set a secure password",
                ))
            }
            None => {}
        }

        let password = match secure_password {
            Some(hash) => PasswordHasher::parse_hash(hash).map_err(|e| {
                AppError::InvalidArgument(format!("secure password is not a valid hash: {e}"))
            })?,
            None => self.ctx.hash_password(&req.plain_password).await?,
        };

        let mut new_user = NewUser {
            username: req.username,
            password,
            first_name: req.first_name,
            last_name: req.last_name,
            is_superuser: req.is_superuser,
            is_active: req.is_active,
            is_confirmed: req.is_confirmed,
            is_staff: req.is_staff,
            confirmation_token: Some(Uuid::new_v4().to_string().into_bytes()),
            created_by: actor.as_ref().and_then(Actor::id),
        };
        if new_user.is_superuser {
            new_user.is_active = true;
            new_user.is_confirmed = true;
            new_user.is_staff = false;
        }

        let user = self
            .ctx
            .repositories
            .user
            .insert(&new_user)
            .await
            .map_err(|e| match e {
                StorageError::UniqueViolation(_) => {
                    AppError::already_exists("user with given username already exists")
                }
                other => AppError::storage("user cannot be created", other),
            })?;

        info!(
            user_id = user.id,
            is_superuser = user.is_superuser,
            created_by = ?user.created_by,
            "User created"
        );

        Ok(UserResponse { user: user.into() })
    }

    /// 修改用户
    pub async fn modify(
        &self,
        ctx: &RequestContext,
        req: ModifyUserRequest,
    ) -> Result<UserResponse, AppError> {
        require_id(req.id, "user")?;

        if let Some(username) = req.username.value() {
            self.check_username(username)?;
        }
        if let Some(password) = req.plain_password.value() {
            self.check_plain_password(password)?;
        }
        if req.plain_password.is_present() && req.secure_password.is_present() {
            return Err(AppError::invalid_argument(
                "plain and secure password are mutually exclusive",
            ));
        }
        if matches!(req.plain_password, Patch::Null) || matches!(req.secure_password, Patch::Null)
        {
            return Err(AppError::invalid_argument("password cannot be null"));
        }

        let actor = self.ctx.resolver.resolve(ctx).await?;
        let target = self.find_user(req.id).await?;

        firewall::check(
            &actor,
            Operation::ModifyUser,
            &Facts::user(&target)
                .requesting(req.is_superuser.value().copied(), req.is_staff.value().copied())
                .with_secure_password(req.secure_password.is_present()),
        )?;

        let password = match (&req.plain_password, &req.secure_password) {
            (Patch::Value(plain), _) => Patch::Value(self.ctx.hash_password(plain).await?),
            (_, Patch::Value(hash)) => Patch::Value(PasswordHasher::parse_hash(hash).map_err(
                |e| AppError::InvalidArgument(format!("secure password is not a valid hash: {e}")),
            )?),
            _ => Patch::Absent,
        };

        let patch = UserPatch {
            username: req.username,
            password,
            first_name: req.first_name,
            last_name: req.last_name,
            is_superuser: req.is_superuser,
            is_active: req.is_active,
            is_confirmed: req.is_confirmed,
            is_staff: req.is_staff,
            confirmation_token: Patch::Absent,
            updated_by: actor.id().into(),
        };
        if patch.is_empty() {
            return Err(AppError::invalid_argument("nothing to modify"));
        }

        let user = self
            .ctx
            .repositories
            .user
            .update_one_by_id(target.id, &patch)
            .await
            .map_err(|e| match e {
                StorageError::UniqueViolation(_) => {
                    AppError::already_exists("user with given username already exists")
                }
                other => AppError::storage("user cannot be modified", other),
            })?;

        info!(user_id = user.id, updated_by = ?actor.id(), "User modified");

        Ok(UserResponse { user: user.into() })
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        req: UserIdRequest,
    ) -> Result<UserResponse, AppError> {
        require_id(req.id, "user")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        let user = self.find_user(req.id).await?;
        firewall::check(&actor, Operation::GetUser, &Facts::user(&user))?;

        Ok(UserResponse { user: user.into() })
    }

    /// Narrows the filters of a non-superuser to what it may see.
    fn force_list_criteria(actor: &Actor, req: &mut ListUsersRequest) {
        if actor.is_local() || actor.is_superuser() {
            return;
        }

        req.is_superuser.get_or_insert(false);

        let wants_staff = req.is_staff == Some(true);
        if !wants_staff && !actor.has(&USER_CAN_RETRIEVE_STAFF_AS_STRANGER) {
            req.is_staff = Some(false);
        }

        let (stranger, owner) = if wants_staff {
            (USER_CAN_RETRIEVE_STAFF_AS_STRANGER, USER_CAN_RETRIEVE_STAFF_AS_OWNER)
        } else {
            (USER_CAN_RETRIEVE_AS_STRANGER, USER_CAN_RETRIEVE_AS_OWNER)
        };
        if req.created_by.is_none() && actor.has(&owner) && !actor.has(&stranger) {
            req.created_by = actor.id();
        }
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        mut req: ListUsersRequest,
    ) -> Result<ListUsersResponse, AppError> {
        let actor = self.ctx.resolver.resolve(ctx).await?;
        Self::force_list_criteria(&actor, &mut req);

        firewall::check(
            &actor,
            Operation::ListUsers,
            &Facts::owned_by(req.created_by).requesting(req.is_superuser, req.is_staff),
        )?;

        let criteria = UserCriteria {
            is_superuser: req.is_superuser,
            is_active: req.is_active,
            is_confirmed: req.is_confirmed,
            is_staff: req.is_staff,
            created_by: req.created_by.map(Scalar::Equal),
            page: Pagination::from_request(req.offset, req.limit, req.sort),
            ..Default::default()
        };
        criteria.validate().map_err(invalid_criteria)?;

        let users = self
            .ctx
            .repositories
            .user
            .find(&criteria)
            .await
            .map_err(|e| AppError::storage("users cannot be listed", e))?;

        Ok(ListUsersResponse {
            users: users.into_iter().map(Into::into).collect(),
        })
    }

    /// 删除用户
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        req: UserIdRequest,
    ) -> Result<DeleteResponse, AppError> {
        require_id(req.id, "user")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        let target = self.find_user(req.id).await?;
        firewall::check(&actor, Operation::DeleteUser, &Facts::user(&target))?;

        let affected = self
            .ctx
            .repositories
            .user
            .delete_one_by_id(target.id)
            .await
            .map_err(|e| match e {
                StorageError::ForeignKeyViolation(constraint) => {
                    tracing::debug!(constraint = %constraint, "user still referenced");
                    AppError::failed_precondition("user is still referenced by other entities")
                }
                other => AppError::storage("user cannot be deleted", other),
            })?;
        if affected == 0 {
            return Err(AppError::not_found("user does not exist"));
        }

        info!(user_id = target.id, deleted_by = ?actor.id(), "User deleted");

        Ok(DeleteResponse { affected })
    }

    /// Effective permissions of a user.
    pub async fn list_permissions(
        &self,
        ctx: &RequestContext,
        req: UserIdRequest,
    ) -> Result<ListPermissionsResponse, AppError> {
        require_id(req.id, "user")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ListUserPermissions, &Facts::subject(req.id))?;

        let permissions = self
            .ctx
            .repositories
            .permission
            .find_by_user_id(req.id)
            .await
            .map_err(|e| AppError::storage("user permissions cannot be listed", e))?;

        Ok(ListPermissionsResponse {
            permissions: permissions.to_strings(),
        })
    }

    pub async fn set_permissions(
        &self,
        ctx: &RequestContext,
        req: SetUserPermissionsRequest,
    ) -> Result<SetOutcome, AppError> {
        require_id(req.user_id, "user")?;
        let permissions = parse_permissions(&req.permissions)?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::SetUserPermissions, &Facts::subject(req.user_id))?;

        let outcome = self
            .ctx
            .repositories
            .user_permissions
            .set(req.user_id, &permissions, req.force, actor.id())
            .await
            .map_err(|e| AppError::storage("user permissions cannot be set", e))?;

        info!(
            user_id = req.user_id,
            created = outcome.created,
            removed = outcome.removed,
            "User permissions set"
        );

        Ok(outcome)
    }

    pub async fn list_groups(
        &self,
        ctx: &RequestContext,
        req: UserIdRequest,
    ) -> Result<ListUserGroupsResponse, AppError> {
        require_id(req.id, "user")?;

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::ListUserGroups, &Facts::subject(req.id))?;

        let groups = self
            .ctx
            .repositories
            .group
            .find_by_user_id(req.id)
            .await
            .map_err(|e| AppError::storage("user groups cannot be listed", e))?;

        Ok(ListUserGroupsResponse {
            groups: groups.into_iter().map(Into::into).collect(),
        })
    }

    pub async fn set_groups(
        &self,
        ctx: &RequestContext,
        req: SetUserGroupsRequest,
    ) -> Result<SetOutcome, AppError> {
        require_id(req.user_id, "user")?;
        let mut groups = req.groups;
        for id in &groups {
            require_id(*id, "group")?;
        }
        groups.sort_unstable();
        groups.dedup();

        let actor = self.ctx.resolver.resolve(ctx).await?;
        firewall::check(&actor, Operation::SetUserGroups, &Facts::subject(req.user_id))?;

        let outcome = self
            .ctx
            .repositories
            .user_groups
            .set(req.user_id, &groups, actor.id())
            .await
            .map_err(|e| AppError::storage("user groups cannot be set", e))?;

        info!(
            user_id = req.user_id,
            created = outcome.created,
            removed = outcome.removed,
            "User groups set"
        );

        Ok(outcome)
    }
}
