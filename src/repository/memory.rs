//! In-memory repositories
//!
//! Every table lives behind one mutex, so a multi-row operation holding the
//! guard is a transaction. Constraint names match the PostgreSQL schema so
//! callers see the same [`StorageError`]s from either backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    GroupPermissionsRepository, GroupRepository, PermissionRepository, RefreshTokenRepository,
    Repositories, StorageError, StorageResult, UserGroupsRepository, UserPermissionsRepository,
    UserRepository,
};
use crate::auth::permission::{Permission, Permissions};
use crate::models::{
    criteria::{Pagination, Sort},
    group::{Group, GroupCriteria, GroupPatch, NewGroup},
    patch::Patch,
    permission::{PermissionCriteria, PermissionEntity, RegisterOutcome, SetOutcome},
    refresh_token::{NewRefreshToken, RefreshToken, RefreshTokenCriteria, RefreshTokenPatch},
    user::{NewUser, User, UserCriteria, UserPatch},
};

#[derive(Debug, Clone)]
struct Membership {
    user_id: i64,
    group_id: i64,
}

#[derive(Debug, Clone)]
struct GrantRow {
    owner_id: i64,
    permission: Permission,
}

#[derive(Debug, Clone, Copy)]
enum GrantTable {
    User,
    Group,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    user_seq: i64,
    groups: BTreeMap<i64, Group>,
    group_seq: i64,
    permissions: BTreeMap<i64, PermissionEntity>,
    permission_seq: i64,
    user_groups: Vec<Membership>,
    user_permissions: Vec<GrantRow>,
    group_permissions: Vec<GrantRow>,
    refresh_tokens: Vec<RefreshToken>,
}

impl Tables {
    fn check_user_fk(&self, id: Option<i64>, constraint: &str) -> StorageResult<()> {
        match id {
            Some(id) if !self.users.contains_key(&id) => {
                Err(StorageError::ForeignKeyViolation(constraint.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Name of a foreign key that still points at the user, if any.
    fn user_reference(&self, id: i64) -> Option<&'static str> {
        let by = Some(id);
        if self.user_groups.iter().any(|m| m.user_id == id) {
            Some("user_groups_user_id_fkey")
        } else if self.user_permissions.iter().any(|g| g.owner_id == id) {
            Some("user_permissions_user_id_fkey")
        } else if self.refresh_tokens.iter().any(|t| t.user_id == id) {
            Some("refresh_token_user_id_fkey")
        } else if self.users.values().any(|u| u.id != id && u.created_by == by) {
            Some("user_created_by_fkey")
        } else if self.users.values().any(|u| u.id != id && u.updated_by == by) {
            Some("user_updated_by_fkey")
        } else if self.groups.values().any(|g| g.created_by == by) {
            Some("group_created_by_fkey")
        } else if self.groups.values().any(|g| g.updated_by == by) {
            Some("group_updated_by_fkey")
        } else {
            None
        }
    }

    fn group_reference(&self, id: i64) -> Option<&'static str> {
        if self.user_groups.iter().any(|m| m.group_id == id) {
            Some("user_groups_group_id_fkey")
        } else if self.group_permissions.iter().any(|g| g.owner_id == id) {
            Some("group_permissions_group_id_fkey")
        } else {
            None
        }
    }

    fn catalog(&self) -> BTreeSet<Permission> {
        self.permissions
            .values()
            .filter_map(|e| e.permission().ok())
            .collect()
    }

    fn insert_permission(&mut self, permission: &Permission, now: DateTime<Utc>) {
        self.permission_seq += 1;
        let (subsystem, module, action) = permission.split();
        self.permissions.insert(
            self.permission_seq,
            PermissionEntity {
                id: self.permission_seq,
                subsystem: subsystem.to_string(),
                module: module.to_string(),
                action: action.to_string(),
                created_at: now,
                updated_at: None,
            },
        );
    }

    fn grants_mut(&mut self, table: GrantTable) -> &mut Vec<GrantRow> {
        match table {
            GrantTable::User => &mut self.user_permissions,
            GrantTable::Group => &mut self.group_permissions,
        }
    }

    fn group_ids_of(&self, user_id: i64) -> BTreeSet<i64> {
        self.user_groups
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.group_id)
            .collect()
    }
}

/// Handle to one in-memory database. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            user: Arc::new(MemoryUserRepository(self.clone())),
            group: Arc::new(MemoryGroupRepository(self.clone())),
            permission: Arc::new(MemoryPermissionRepository(self.clone())),
            user_groups: Arc::new(MemoryUserGroupsRepository(self.clone())),
            user_permissions: Arc::new(MemoryUserPermissionsRepository(self.clone())),
            group_permissions: Arc::new(MemoryGroupPermissionsRepository(self.clone())),
            refresh_token: Arc::new(MemoryRefreshTokenRepository(self.clone())),
        }
    }
}

impl Repositories {
    /// Repositories backed by a fresh, empty in-memory database.
    pub fn memory() -> Self {
        MemoryDatabase::new().repositories()
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SortValue<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Text(&'a str),
    Time(DateTime<Utc>),
}

impl<'a> From<Option<DateTime<Utc>>> for SortValue<'a> {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(SortValue::Null, SortValue::Time)
    }
}

fn order_and_page<T>(
    mut items: Vec<T>,
    page: &Pagination,
    key: for<'a> fn(&'a T, &str) -> SortValue<'a>,
) -> Vec<T> {
    if !page.sort.is_empty() {
        items.sort_by(|a, b| compare(a, b, &page.sort, key));
    }
    page.apply(items)
}

fn compare<T>(a: &T, b: &T, sort: &[Sort], key: for<'a> fn(&'a T, &str) -> SortValue<'a>) -> Ordering {
    for s in sort {
        let ord = key(a, &s.column).cmp(&key(b, &s.column));
        let ord = if s.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn user_sort_key<'a>(u: &'a User, column: &str) -> SortValue<'a> {
    match column {
        "username" => SortValue::Text(&u.username),
        "first_name" => SortValue::Text(&u.first_name),
        "last_name" => SortValue::Text(&u.last_name),
        "created_at" => SortValue::Time(u.created_at),
        "updated_at" => u.updated_at.into(),
        "last_login_at" => u.last_login_at.into(),
        _ => SortValue::Int(u.id),
    }
}

fn group_sort_key<'a>(g: &'a Group, column: &str) -> SortValue<'a> {
    match column {
        "name" => SortValue::Text(&g.name),
        "created_at" => SortValue::Time(g.created_at),
        "updated_at" => g.updated_at.into(),
        _ => SortValue::Int(g.id),
    }
}

fn permission_sort_key<'a>(p: &'a PermissionEntity, column: &str) -> SortValue<'a> {
    match column {
        "subsystem" => SortValue::Text(&p.subsystem),
        "module" => SortValue::Text(&p.module),
        "action" => SortValue::Text(&p.action),
        "created_at" => SortValue::Time(p.created_at),
        _ => SortValue::Int(p.id),
    }
}

fn refresh_token_sort_key<'a>(t: &'a RefreshToken, column: &str) -> SortValue<'a> {
    match column {
        "updated_at" => t.updated_at.into(),
        "expire_at" => t.expire_at.into(),
        "last_used_at" => t.last_used_at.into(),
        "user_id" => SortValue::Int(t.user_id),
        "revoked" => SortValue::Bool(t.revoked),
        _ => SortValue::Time(t.created_at),
    }
}

fn required<T: Clone>(patch: &Patch<T>, column: &str, target: &mut T) -> StorageResult<()> {
    match patch {
        Patch::Absent => Ok(()),
        Patch::Null => Err(StorageError::NotNullViolation(column.to_string())),
        Patch::Value(v) => {
            *target = v.clone();
            Ok(())
        }
    }
}

fn nullable<T: Clone>(patch: &Patch<T>, target: &mut Option<T>) {
    patch.clone().apply_to(target);
}

fn patch_user(tables: &Tables, current: &User, patch: &UserPatch) -> StorageResult<User> {
    let mut next = current.clone();
    required(&patch.username, "username", &mut next.username)?;
    required(&patch.password, "password", &mut next.password)?;
    required(&patch.first_name, "first_name", &mut next.first_name)?;
    required(&patch.last_name, "last_name", &mut next.last_name)?;
    required(&patch.is_superuser, "is_superuser", &mut next.is_superuser)?;
    required(&patch.is_active, "is_active", &mut next.is_active)?;
    required(&patch.is_confirmed, "is_confirmed", &mut next.is_confirmed)?;
    required(&patch.is_staff, "is_staff", &mut next.is_staff)?;
    nullable(&patch.confirmation_token, &mut next.confirmation_token);
    nullable(&patch.updated_by, &mut next.updated_by);
    next.updated_at = Some(Utc::now());

    if next.username != current.username
        && tables.users.values().any(|u| u.username == next.username)
    {
        return Err(StorageError::UniqueViolation("user_username_key".to_string()));
    }
    tables.check_user_fk(next.updated_by, "user_updated_by_fkey")?;

    Ok(next)
}

fn patch_group(tables: &Tables, current: &Group, patch: &GroupPatch) -> StorageResult<Group> {
    let mut next = current.clone();
    required(&patch.name, "name", &mut next.name)?;
    nullable(&patch.description, &mut next.description);
    nullable(&patch.updated_by, &mut next.updated_by);
    next.updated_at = Some(Utc::now());

    if next.name != current.name && tables.groups.values().any(|g| g.name == next.name) {
        return Err(StorageError::UniqueViolation("group_name_key".to_string()));
    }
    tables.check_user_fk(next.updated_by, "group_updated_by_fkey")?;

    Ok(next)
}

fn insert_user(tables: &mut Tables, user: &NewUser) -> StorageResult<User> {
    if tables.users.values().any(|u| u.username == user.username) {
        return Err(StorageError::UniqueViolation("user_username_key".to_string()));
    }
    tables.check_user_fk(user.created_by, "user_created_by_fkey")?;

    tables.user_seq += 1;
    let row = User {
        id: tables.user_seq,
        username: user.username.clone(),
        password: user.password.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        is_superuser: user.is_superuser,
        is_active: user.is_active,
        is_confirmed: user.is_confirmed,
        is_staff: user.is_staff,
        confirmation_token: user.confirmation_token.clone(),
        last_login_at: None,
        created_at: Utc::now(),
        created_by: user.created_by,
        updated_at: None,
        updated_by: None,
    };
    tables.users.insert(row.id, row.clone());
    Ok(row)
}

fn insert_group(tables: &mut Tables, group: &NewGroup) -> StorageResult<Group> {
    if tables.groups.values().any(|g| g.name == group.name) {
        return Err(StorageError::UniqueViolation("group_name_key".to_string()));
    }
    tables.check_user_fk(group.created_by, "group_created_by_fkey")?;

    tables.group_seq += 1;
    let row = Group {
        id: tables.group_seq,
        name: group.name.clone(),
        description: group.description.clone(),
        created_at: Utc::now(),
        created_by: group.created_by,
        updated_at: None,
        updated_by: None,
    };
    tables.groups.insert(row.id, row.clone());
    Ok(row)
}

/// Shared diff of the two permission assignment tables.
fn set_grants(
    tables: &mut Tables,
    table: GrantTable,
    owner_id: i64,
    permissions: &Permissions,
    force: bool,
    permission_fkey: &str,
) -> StorageResult<SetOutcome> {
    let catalog = tables.catalog();
    let missing: Vec<&Permission> = permissions.iter().filter(|p| !catalog.contains(*p)).collect();
    if !missing.is_empty() && !force {
        return Err(StorageError::ForeignKeyViolation(permission_fkey.to_string()));
    }
    let now = Utc::now();
    for permission in missing {
        tables.insert_permission(permission, now);
    }

    let grants = tables.grants_mut(table);
    let current: BTreeSet<Permission> = grants
        .iter()
        .filter(|g| g.owner_id == owner_id)
        .map(|g| g.permission.clone())
        .collect();

    let before = grants.len();
    grants.retain(|g| g.owner_id != owner_id || permissions.contains(&g.permission));
    let removed = before - grants.len();

    let mut created = 0;
    for permission in permissions.iter().filter(|p| !current.contains(*p)) {
        grants.push(GrantRow {
            owner_id,
            permission: permission.clone(),
        });
        created += 1;
    }

    Ok(SetOutcome {
        created,
        removed: removed as i64,
    })
}

pub struct MemoryUserRepository(MemoryDatabase);

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find(&self, criteria: &UserCriteria) -> StorageResult<Vec<User>> {
        let tables = self.0.lock();
        let rows = tables.users.values().filter(|u| criteria.matches(u)).cloned().collect();
        Ok(order_and_page(rows, &criteria.page, user_sort_key))
    }

    async fn find_one_by_id(&self, id: i64) -> StorageResult<User> {
        self.0.lock().users.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_one_by_username(&self, username: &str) -> StorageResult<User> {
        self.0
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn count(&self, criteria: &UserCriteria) -> StorageResult<i64> {
        Ok(self.0.lock().users.values().filter(|u| criteria.matches(u)).count() as i64)
    }

    async fn exists(&self, id: i64) -> StorageResult<bool> {
        Ok(self.0.lock().users.contains_key(&id))
    }

    async fn insert(&self, user: &NewUser) -> StorageResult<User> {
        insert_user(&mut self.0.lock(), user)
    }

    async fn upsert(&self, user: &NewUser, patch: &UserPatch) -> StorageResult<User> {
        let mut tables = self.0.lock();
        let existing = tables.users.values().find(|u| u.username == user.username).cloned();
        match existing {
            Some(current) => {
                let next = patch_user(&tables, &current, patch)?;
                tables.users.insert(next.id, next.clone());
                Ok(next)
            }
            None => insert_user(&mut tables, user),
        }
    }

    async fn update_one_by_id(&self, id: i64, patch: &UserPatch) -> StorageResult<User> {
        let mut tables = self.0.lock();
        let current = tables.users.get(&id).cloned().ok_or(StorageError::NotFound)?;
        let next = patch_user(&tables, &current, patch)?;
        tables.users.insert(id, next.clone());
        Ok(next)
    }

    async fn update_last_login_at(&self, id: i64) -> StorageResult<()> {
        let mut tables = self.0.lock();
        let user = tables.users.get_mut(&id).ok_or(StorageError::NotFound)?;
        let now = Utc::now();
        user.last_login_at = Some(now);
        user.updated_at = Some(now);
        Ok(())
    }

    async fn delete_one_by_id(&self, id: i64) -> StorageResult<u64> {
        let mut tables = self.0.lock();
        if !tables.users.contains_key(&id) {
            return Ok(0);
        }
        if let Some(constraint) = tables.user_reference(id) {
            return Err(StorageError::ForeignKeyViolation(constraint.to_string()));
        }
        tables.users.remove(&id);
        Ok(1)
    }
}

pub struct MemoryGroupRepository(MemoryDatabase);

#[async_trait]
impl GroupRepository for MemoryGroupRepository {
    async fn find(&self, criteria: &GroupCriteria) -> StorageResult<Vec<Group>> {
        let tables = self.0.lock();
        let rows = tables.groups.values().filter(|g| criteria.matches(g)).cloned().collect();
        Ok(order_and_page(rows, &criteria.page, group_sort_key))
    }

    async fn find_one_by_id(&self, id: i64) -> StorageResult<Group> {
        self.0.lock().groups.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_by_user_id(&self, user_id: i64) -> StorageResult<Vec<Group>> {
        let tables = self.0.lock();
        let ids = tables.group_ids_of(user_id);
        Ok(ids.iter().filter_map(|id| tables.groups.get(id).cloned()).collect())
    }

    async fn count(&self, criteria: &GroupCriteria) -> StorageResult<i64> {
        Ok(self.0.lock().groups.values().filter(|g| criteria.matches(g)).count() as i64)
    }

    async fn insert(&self, group: &NewGroup) -> StorageResult<Group> {
        insert_group(&mut self.0.lock(), group)
    }

    async fn upsert(&self, group: &NewGroup, patch: &GroupPatch) -> StorageResult<Group> {
        let mut tables = self.0.lock();
        let existing = tables.groups.values().find(|g| g.name == group.name).cloned();
        match existing {
            Some(current) => {
                let next = patch_group(&tables, &current, patch)?;
                tables.groups.insert(next.id, next.clone());
                Ok(next)
            }
            None => insert_group(&mut tables, group),
        }
    }

    async fn update_one_by_id(&self, id: i64, patch: &GroupPatch) -> StorageResult<Group> {
        let mut tables = self.0.lock();
        let current = tables.groups.get(&id).cloned().ok_or(StorageError::NotFound)?;
        let next = patch_group(&tables, &current, patch)?;
        tables.groups.insert(id, next.clone());
        Ok(next)
    }

    async fn delete_one_by_id(&self, id: i64) -> StorageResult<u64> {
        let mut tables = self.0.lock();
        if !tables.groups.contains_key(&id) {
            return Ok(0);
        }
        if let Some(constraint) = tables.group_reference(id) {
            return Err(StorageError::ForeignKeyViolation(constraint.to_string()));
        }
        tables.groups.remove(&id);
        Ok(1)
    }
}

pub struct MemoryPermissionRepository(MemoryDatabase);

#[async_trait]
impl PermissionRepository for MemoryPermissionRepository {
    async fn find(&self, criteria: &PermissionCriteria) -> StorageResult<Vec<PermissionEntity>> {
        let tables = self.0.lock();
        let rows = tables
            .permissions
            .values()
            .filter(|p| criteria.matches(p))
            .cloned()
            .collect();
        Ok(order_and_page(rows, &criteria.page, permission_sort_key))
    }

    async fn find_one_by_id(&self, id: i64) -> StorageResult<PermissionEntity> {
        self.0.lock().permissions.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn count(&self, criteria: &PermissionCriteria) -> StorageResult<i64> {
        Ok(self.0.lock().permissions.values().filter(|p| criteria.matches(p)).count() as i64)
    }

    async fn find_by_user_id(&self, user_id: i64) -> StorageResult<Permissions> {
        let tables = self.0.lock();
        let groups = tables.group_ids_of(user_id);
        let direct = tables
            .user_permissions
            .iter()
            .filter(|g| g.owner_id == user_id);
        let inherited = tables
            .group_permissions
            .iter()
            .filter(|g| groups.contains(&g.owner_id));
        Ok(direct.chain(inherited).map(|g| g.permission.clone()).collect())
    }

    async fn find_by_group_id(&self, group_id: i64) -> StorageResult<Permissions> {
        Ok(self
            .0
            .lock()
            .group_permissions
            .iter()
            .filter(|g| g.owner_id == group_id)
            .map(|g| g.permission.clone())
            .collect())
    }

    async fn register(
        &self,
        subsystem: &str,
        permissions: &Permissions,
    ) -> StorageResult<RegisterOutcome> {
        let mut tables = self.0.lock();
        let current: BTreeSet<Permission> = tables
            .catalog()
            .into_iter()
            .filter(|p| p.subsystem() == subsystem)
            .collect();

        let mut outcome = RegisterOutcome::default();
        let now = Utc::now();
        for permission in permissions.iter() {
            if current.contains(permission) {
                outcome.untouched += 1;
            } else {
                tables.insert_permission(permission, now);
                outcome.created += 1;
            }
        }

        let stale: BTreeSet<Permission> = current
            .into_iter()
            .filter(|p| !permissions.contains(p))
            .collect();
        if !stale.is_empty() {
            tables.permissions.retain(|_, e| {
                e.permission().map_or(true, |p| !stale.contains(&p))
            });
            // grants reference the tuple with ON DELETE CASCADE
            tables.user_permissions.retain(|g| !stale.contains(&g.permission));
            tables.group_permissions.retain(|g| !stale.contains(&g.permission));
        }
        outcome.removed = stale.len() as i64;

        Ok(outcome)
    }
}

pub struct MemoryUserGroupsRepository(MemoryDatabase);

#[async_trait]
impl UserGroupsRepository for MemoryUserGroupsRepository {
    async fn exists(&self, user_id: i64, group_id: i64) -> StorageResult<bool> {
        Ok(self
            .0
            .lock()
            .user_groups
            .iter()
            .any(|m| m.user_id == user_id && m.group_id == group_id))
    }

    async fn set(
        &self,
        user_id: i64,
        group_ids: &[i64],
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        let mut tables = self.0.lock();
        let desired: BTreeSet<i64> = group_ids.iter().copied().collect();

        tables.check_user_fk(Some(user_id), "user_groups_user_id_fkey")?;
        tables.check_user_fk(actor_id, "user_groups_created_by_fkey")?;
        if desired.iter().any(|id| !tables.groups.contains_key(id)) {
            return Err(StorageError::ForeignKeyViolation(
                "user_groups_group_id_fkey".to_string(),
            ));
        }

        let current = tables.group_ids_of(user_id);
        let before = tables.user_groups.len();
        tables
            .user_groups
            .retain(|m| m.user_id != user_id || desired.contains(&m.group_id));
        let removed = (before - tables.user_groups.len()) as i64;

        let mut created = 0;
        for group_id in desired.difference(&current) {
            tables.user_groups.push(Membership {
                user_id,
                group_id: *group_id,
            });
            created += 1;
        }

        Ok(SetOutcome { created, removed })
    }
}

pub struct MemoryUserPermissionsRepository(MemoryDatabase);

#[async_trait]
impl UserPermissionsRepository for MemoryUserPermissionsRepository {
    async fn set(
        &self,
        user_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        let mut tables = self.0.lock();
        tables.check_user_fk(Some(user_id), "user_permissions_user_id_fkey")?;
        tables.check_user_fk(actor_id, "user_permissions_created_by_fkey")?;
        set_grants(
            &mut tables,
            GrantTable::User,
            user_id,
            permissions,
            force,
            "user_permissions_subsystem_module_action_fkey",
        )
    }
}

pub struct MemoryGroupPermissionsRepository(MemoryDatabase);

#[async_trait]
impl GroupPermissionsRepository for MemoryGroupPermissionsRepository {
    async fn set(
        &self,
        group_id: i64,
        permissions: &Permissions,
        force: bool,
        actor_id: Option<i64>,
    ) -> StorageResult<SetOutcome> {
        let mut tables = self.0.lock();
        if !tables.groups.contains_key(&group_id) {
            return Err(StorageError::ForeignKeyViolation(
                "group_permissions_group_id_fkey".to_string(),
            ));
        }
        tables.check_user_fk(actor_id, "group_permissions_created_by_fkey")?;
        set_grants(
            &mut tables,
            GrantTable::Group,
            group_id,
            permissions,
            force,
            "group_permissions_subsystem_module_action_fkey",
        )
    }
}

pub struct MemoryRefreshTokenRepository(MemoryDatabase);

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepository {
    async fn find(&self, criteria: &RefreshTokenCriteria) -> StorageResult<Vec<RefreshToken>> {
        let tables = self.0.lock();
        let rows = tables
            .refresh_tokens
            .iter()
            .filter(|t| criteria.matches(t))
            .cloned()
            .collect();
        Ok(order_and_page(rows, &criteria.page, refresh_token_sort_key))
    }

    async fn find_one_by_token(&self, token: &str) -> StorageResult<RefreshToken> {
        self.0
            .lock()
            .refresh_tokens
            .iter()
            .find(|t| t.token == token)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn count(&self, criteria: &RefreshTokenCriteria) -> StorageResult<i64> {
        Ok(self.0.lock().refresh_tokens.iter().filter(|t| criteria.matches(t)).count() as i64)
    }

    async fn insert(&self, token: &NewRefreshToken) -> StorageResult<RefreshToken> {
        let mut tables = self.0.lock();
        if tables.refresh_tokens.iter().any(|t| t.token == token.token) {
            return Err(StorageError::UniqueViolation("refresh_token_token_key".to_string()));
        }
        tables.check_user_fk(Some(token.user_id), "refresh_token_user_id_fkey")?;
        tables.check_user_fk(token.created_by, "refresh_token_created_by_fkey")?;

        let row = RefreshToken {
            token: token.token.clone(),
            user_id: token.user_id,
            revoked: false,
            expire_at: token.expire_at,
            last_used_at: None,
            notes: token.notes.clone(),
            created_at: Utc::now(),
            created_by: token.created_by,
            updated_at: None,
            updated_by: None,
        };
        tables.refresh_tokens.push(row.clone());
        Ok(row)
    }

    async fn update_one_by_token_and_user_id(
        &self,
        token: &str,
        user_id: i64,
        patch: &RefreshTokenPatch,
    ) -> StorageResult<RefreshToken> {
        let mut tables = self.0.lock();
        tables.check_user_fk(patch.updated_by.value().copied(), "refresh_token_updated_by_fkey")?;
        let row = tables
            .refresh_tokens
            .iter_mut()
            .find(|t| t.token == token && t.user_id == user_id)
            .ok_or(StorageError::NotFound)?;

        let mut next = row.clone();
        required(&patch.revoked, "revoked", &mut next.revoked)?;
        nullable(&patch.expire_at, &mut next.expire_at);
        nullable(&patch.last_used_at, &mut next.last_used_at);
        nullable(&patch.notes, &mut next.notes);
        nullable(&patch.updated_by, &mut next.updated_by);
        next.updated_at = Some(Utc::now());

        *row = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::criteria::Scalar;

    fn new_user(username: &str, created_by: Option<i64>) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: b"hash".to_vec(),
            first_name: "First".to_string(),
            last_name: "Last".to_string(),
            is_active: true,
            is_confirmed: true,
            created_by,
            ..Default::default()
        }
    }

    fn perms(items: &[&str]) -> Permissions {
        items.iter().map(|s| s.parse::<Permission>().unwrap()).collect()
    }

    async fn group(repos: &Repositories, name: &str) -> i64 {
        repos
            .group
            .insert(&NewGroup {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_user_unique_and_foreign_keys() {
        let repos = Repositories::memory();

        let root = repos.user.insert(&new_user("root", None)).await.unwrap();
        assert_eq!(root.id, 1);

        let err = repos.user.insert(&new_user("root", None)).await.unwrap_err();
        assert_eq!(err.constraint(), Some("user_username_key"));

        let err = repos.user.insert(&new_user("ghost", Some(99))).await.unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation(c) if c == "user_created_by_fkey"));

        let child = repos.user.insert(&new_user("child", Some(root.id))).await.unwrap();
        let err = repos.user.delete_one_by_id(root.id).await.unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation(_)));

        assert_eq!(repos.user.delete_one_by_id(child.id).await.unwrap(), 1);
        assert_eq!(repos.user.delete_one_by_id(child.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_user_patch_null_on_required_column() {
        let repos = Repositories::memory();
        let user = repos.user.insert(&new_user("john", None)).await.unwrap();

        let patch = UserPatch {
            first_name: Patch::Null,
            ..Default::default()
        };
        let err = repos.user.update_one_by_id(user.id, &patch).await.unwrap_err();
        assert!(matches!(err, StorageError::NotNullViolation(c) if c == "first_name"));

        let patch = UserPatch {
            first_name: Patch::Value("Johnny".to_string()),
            ..Default::default()
        };
        let updated = repos.user.update_one_by_id(user.id, &patch).await.unwrap();
        assert_eq!(updated.first_name, "Johnny");
        assert_eq!(updated.last_name, "Last");
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_user_upsert_conflicts_on_username() {
        let repos = Repositories::memory();
        let patch = UserPatch {
            is_staff: Patch::Value(true),
            ..Default::default()
        };

        let first = repos.user.upsert(&new_user("ops", None), &patch).await.unwrap();
        assert!(!first.is_staff);

        let second = repos.user.upsert(&new_user("ops", None), &patch).await.unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.is_staff);
    }

    #[tokio::test]
    async fn test_user_find_sort_and_page() {
        let repos = Repositories::memory();
        for name in ["carol", "alice", "bob"] {
            repos.user.insert(&new_user(name, None)).await.unwrap();
        }

        let mut criteria = UserCriteria::default();
        criteria.page.sort.push(Sort {
            column: "username".to_string(),
            ascending: true,
        });
        criteria.page.limit = 2;
        let names: Vec<String> = repos
            .user
            .find(&criteria)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);

        criteria.id = Some(Scalar::In(vec![1, 3]));
        assert_eq!(repos.user.count(&criteria).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_set_user_groups_diff_counts() {
        let repos = Repositories::memory();
        let user = repos.user.insert(&new_user("u", None)).await.unwrap();
        let mut g = Vec::new();
        for name in ["g1", "g2", "g3", "g4"] {
            g.push(group(&repos, name).await);
        }

        let out = repos.user_groups.set(user.id, &[g[0], g[1], g[2]], None).await.unwrap();
        assert_eq!((out.created, out.removed), (3, 0));

        let out = repos.user_groups.set(user.id, &[g[1], g[2], g[3]], None).await.unwrap();
        assert_eq!((out.created, out.removed), (1, 1));

        // repeating the same set is a no-op
        let out = repos.user_groups.set(user.id, &[g[1], g[2], g[3]], None).await.unwrap();
        assert_eq!((out.created, out.removed), (0, 0));

        let out = repos.user_groups.set(user.id, &[], None).await.unwrap();
        assert_eq!((out.created, out.removed), (0, 3));
    }

    #[tokio::test]
    async fn test_set_user_groups_unknown_group_is_atomic() {
        let repos = Repositories::memory();
        let user = repos.user.insert(&new_user("u", None)).await.unwrap();
        let g1 = group(&repos, "g1").await;

        let err = repos.user_groups.set(user.id, &[g1, 404], None).await.unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation(c) if c == "user_groups_group_id_fkey"));
        assert!(!repos.user_groups.exists(user.id, g1).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_permissions_force_and_effective_set() {
        let repos = Repositories::memory();
        let user = repos.user.insert(&new_user("u", None)).await.unwrap();
        let g1 = group(&repos, "g1").await;
        repos.permission.register("sys", &perms(&["sys:m:a"])).await.unwrap();

        let err = repos
            .user_permissions
            .set(user.id, &perms(&["sys:m:a", "sys:m:b"]), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation(_)));

        let out = repos
            .user_permissions
            .set(user.id, &perms(&["sys:m:a", "sys:m:b"]), true, None)
            .await
            .unwrap();
        assert_eq!((out.created, out.removed), (2, 0));

        repos
            .group_permissions
            .set(g1, &perms(&["sys:m:c"]), true, None)
            .await
            .unwrap();
        repos.user_groups.set(user.id, &[g1], None).await.unwrap();

        let effective = repos.permission.find_by_user_id(user.id).await.unwrap();
        assert_eq!(effective, perms(&["sys:m:a", "sys:m:b", "sys:m:c"]));
        assert_eq!(repos.permission.find_by_group_id(g1).await.unwrap(), perms(&["sys:m:c"]));
    }

    #[tokio::test]
    async fn test_register_reconciles_subsystem_partition() {
        let repos = Repositories::memory();
        repos.permission.register("other", &perms(&["other:m:x"])).await.unwrap();

        let out = repos.permission.register("sys", &perms(&["sys:m:a", "sys:m:b"])).await.unwrap();
        assert_eq!(out, RegisterOutcome { created: 2, untouched: 0, removed: 0 });

        let user = repos.user.insert(&new_user("u", None)).await.unwrap();
        repos
            .user_permissions
            .set(user.id, &perms(&["sys:m:a"]), false, None)
            .await
            .unwrap();

        let out = repos.permission.register("sys", &perms(&["sys:m:b", "sys:m:c"])).await.unwrap();
        assert_eq!(out, RegisterOutcome { created: 1, untouched: 1, removed: 1 });

        // removal cascaded to the grant, other subsystems untouched
        assert!(repos.permission.find_by_user_id(user.id).await.unwrap().is_empty());
        assert_eq!(repos.permission.count(&PermissionCriteria::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_refresh_token_update_by_key() {
        let repos = Repositories::memory();
        let user = repos.user.insert(&new_user("u", None)).await.unwrap();
        let new = NewRefreshToken {
            token: "abc".to_string(),
            user_id: user.id,
            expire_at: None,
            notes: Some("laptop".to_string()),
            created_by: Some(user.id),
        };
        repos.refresh_token.insert(&new).await.unwrap();

        let err = repos.refresh_token.insert(&new).await.unwrap_err();
        assert_eq!(err.constraint(), Some("refresh_token_token_key"));

        let patch = RefreshTokenPatch {
            revoked: Patch::Value(true),
            ..Default::default()
        };
        let err = repos
            .refresh_token
            .update_one_by_token_and_user_id("abc", user.id + 1, &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));

        let token = repos
            .refresh_token
            .update_one_by_token_and_user_id("abc", user.id, &patch)
            .await
            .unwrap();
        assert!(token.revoked);
        assert_eq!(token.notes.as_deref(), Some("laptop"));
    }
}
