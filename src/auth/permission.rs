//! Permission three-tuple and the built-in permission catalog

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Subsystem owning every built-in permission.
pub const SUBSYSTEM: &str = "charon";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionParseError {
    #[error("permission must have the form subsystem:module:action")]
    Malformed,
    #[error("permission {0} cannot be empty")]
    EmptyComponent(&'static str),
}

/// A capability identified by `(subsystem, module, action)`.
///
/// The wire form is `subsystem:module:action`. Equality is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    subsystem: Cow<'static, str>,
    module: Cow<'static, str>,
    action: Cow<'static, str>,
}

impl Permission {
    const fn from_static(subsystem: &'static str, module: &'static str, action: &'static str) -> Self {
        Self {
            subsystem: Cow::Borrowed(subsystem),
            module: Cow::Borrowed(module),
            action: Cow::Borrowed(action),
        }
    }

    pub fn new(
        subsystem: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Self, PermissionParseError> {
        let (subsystem, module, action) = (subsystem.into(), module.into(), action.into());
        if subsystem.is_empty() {
            return Err(PermissionParseError::EmptyComponent("subsystem"));
        }
        if module.is_empty() {
            return Err(PermissionParseError::EmptyComponent("module"));
        }
        if action.is_empty() {
            return Err(PermissionParseError::EmptyComponent("action"));
        }

        Ok(Self {
            subsystem: Cow::Owned(subsystem),
            module: Cow::Owned(module),
            action: Cow::Owned(action),
        })
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn split(&self) -> (&str, &str, &str) {
        (&self.subsystem, &self.module, &self.action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.subsystem, self.module, self.action)
    }
}

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(subsystem), Some(module), Some(action), None) => {
                Permission::new(subsystem, module, action)
            }
            _ => Err(PermissionParseError::Malformed),
        }
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A flattened permission set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    /// True when at least one of `permissions` is held.
    pub fn contains_any(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.0.contains(p))
    }

    /// True when every one of `permissions` is held.
    pub fn contains_all(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.0.contains(p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Permission>) {
        self.0.extend(other)
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Permissions {
    type Item = Permission;
    type IntoIter = std::collections::btree_set::IntoIter<Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

macro_rules! builtin {
    ($($name:ident => $module:literal, $action:literal;)*) => {
        $(pub const $name: Permission = Permission::from_static(SUBSYSTEM, $module, $action);)*

        /// Every permission the service registers for itself at start-up.
        pub static BUILTIN: Lazy<Permissions> =
            Lazy::new(|| [$($name),*].into_iter().collect());
    };
}

builtin! {
    USER_CAN_CREATE => "user", "can create";
    USER_CAN_CREATE_STAFF => "user", "can create staff";
    USER_CAN_DELETE_AS_STRANGER => "user", "can delete as stranger";
    USER_CAN_DELETE_AS_OWNER => "user", "can delete as owner";
    USER_CAN_DELETE_STAFF_AS_STRANGER => "user", "can delete staff as stranger";
    USER_CAN_DELETE_STAFF_AS_OWNER => "user", "can delete staff as owner";
    USER_CAN_MODIFY_AS_STRANGER => "user", "can modify as stranger";
    USER_CAN_MODIFY_AS_OWNER => "user", "can modify as owner";
    USER_CAN_MODIFY_STAFF_AS_STRANGER => "user", "can modify staff as stranger";
    USER_CAN_MODIFY_STAFF_AS_OWNER => "user", "can modify staff as owner";
    USER_CAN_RETRIEVE_AS_OWNER => "user", "can retrieve as owner";
    USER_CAN_RETRIEVE_AS_STRANGER => "user", "can retrieve as stranger";
    USER_CAN_RETRIEVE_STAFF_AS_OWNER => "user", "can retrieve staff as owner";
    USER_CAN_RETRIEVE_STAFF_AS_STRANGER => "user", "can retrieve staff as stranger";

    USER_PERMISSION_CAN_CREATE => "user_permission", "can create";
    USER_PERMISSION_CAN_DELETE => "user_permission", "can delete";
    USER_PERMISSION_CAN_MODIFY => "user_permission", "can modify";
    USER_PERMISSION_CAN_RETRIEVE => "user_permission", "can retrieve";
    USER_PERMISSION_CAN_CHECK_GRANTING_AS_STRANGER => "user_permission", "can check granting as a stranger";

    USER_GROUP_CAN_CREATE => "user_group", "can create";
    USER_GROUP_CAN_DELETE => "user_group", "can delete";
    USER_GROUP_CAN_MODIFY => "user_group", "can modify";
    USER_GROUP_CAN_RETRIEVE => "user_group", "can retrieve";
    USER_GROUP_CAN_CHECK_BELONGING_AS_STRANGER => "user_group", "can check belonging as a stranger";

    PERMISSION_CAN_CREATE => "permission", "can create";
    PERMISSION_CAN_DELETE => "permission", "can delete";
    PERMISSION_CAN_MODIFY => "permission", "can modify";
    PERMISSION_CAN_RETRIEVE => "permission", "can retrieve";

    GROUP_CAN_CREATE => "group", "can create";
    GROUP_CAN_DELETE => "group", "can delete";
    GROUP_CAN_MODIFY => "group", "can modify";
    GROUP_CAN_RETRIEVE => "group", "can retrieve";

    GROUP_PERMISSION_CAN_CREATE => "group_permission", "can create";
    GROUP_PERMISSION_CAN_DELETE => "group_permission", "can delete";
    GROUP_PERMISSION_CAN_MODIFY => "group_permission", "can modify";
    GROUP_PERMISSION_CAN_RETRIEVE => "group_permission", "can retrieve";

    REFRESH_TOKEN_CAN_CREATE => "refresh_token", "can create";
    REFRESH_TOKEN_CAN_DISABLE_AS_OWNER => "refresh_token", "can disable as owner";
    REFRESH_TOKEN_CAN_DISABLE_AS_STRANGER => "refresh_token", "can disable as stranger";
    REFRESH_TOKEN_CAN_REVOKE_AS_OWNER => "refresh_token", "can revoke as owner";
    REFRESH_TOKEN_CAN_REVOKE_AS_STRANGER => "refresh_token", "can revoke as stranger";
    REFRESH_TOKEN_CAN_RETRIEVE_AS_OWNER => "refresh_token", "can retrieve as owner";
    REFRESH_TOKEN_CAN_RETRIEVE_AS_STRANGER => "refresh_token", "can retrieve as stranger";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        for s in [
            "charon:user:can create",
            "sys:m:a",
            "a:b:c:d",
            "billing:invoice:can retrieve as owner",
        ] {
            let p: Permission = s.parse().unwrap();
            assert_eq!(p.to_string(), s);
        }
    }

    #[test]
    fn test_parse_is_lenient_on_surrounding_whitespace() {
        let p: Permission = "  sys:mod:act\n".parse().unwrap();
        assert_eq!(p.split(), ("sys", "mod", "act"));
    }

    #[test]
    fn test_parse_rejects_empty_components() {
        assert_eq!("".parse::<Permission>(), Err(PermissionParseError::Malformed));
        assert_eq!("sys:mod".parse::<Permission>(), Err(PermissionParseError::Malformed));
        assert_eq!(
            "sys:mod:act:extra".parse::<Permission>(),
            Err(PermissionParseError::Malformed)
        );
        assert_eq!(
            ":mod:act".parse::<Permission>(),
            Err(PermissionParseError::EmptyComponent("subsystem"))
        );
        assert_eq!(
            "sys::act".parse::<Permission>(),
            Err(PermissionParseError::EmptyComponent("module"))
        );
        assert_eq!(
            "sys:mod:".parse::<Permission>(),
            Err(PermissionParseError::EmptyComponent("action"))
        );
    }

    #[test]
    fn test_equality_is_case_sensitive() {
        let lower: Permission = "sys:mod:act".parse().unwrap();
        let upper: Permission = "SYS:mod:act".parse().unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_builtin_constant_equals_parsed() {
        let parsed: Permission = "charon:user:can create".parse().unwrap();
        assert_eq!(parsed, USER_CAN_CREATE);
        assert!(BUILTIN.contains(&parsed));
        assert!(BUILTIN.iter().all(|p| p.subsystem() == SUBSYSTEM));
    }

    #[test]
    fn test_permissions_contains_any_and_all() {
        let set: Permissions = [USER_CAN_CREATE, GROUP_CAN_CREATE].into_iter().collect();

        assert!(set.contains_any(&[USER_CAN_CREATE_STAFF, USER_CAN_CREATE]));
        assert!(!set.contains_any(&[USER_CAN_CREATE_STAFF]));
        assert!(set.contains_all(&[USER_CAN_CREATE, GROUP_CAN_CREATE]));
        assert!(!set.contains_all(&[USER_CAN_CREATE, GROUP_CAN_DELETE]));
    }

    #[test]
    fn test_serde_uses_wire_form() {
        let json = serde_json::to_string(&GROUP_CAN_RETRIEVE).unwrap();
        assert_eq!(json, "\"charon:group:can retrieve\"");

        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GROUP_CAN_RETRIEVE);
        assert!(serde_json::from_str::<Permission>("\"a::c\"").is_err());
    }
}
