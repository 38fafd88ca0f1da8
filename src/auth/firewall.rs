//! 访问控制防火墙
//!
//! Every operation owns a [`Policy`]: an ordered list of invariants that hold
//! even for superusers, followed by an ordered list of rules. Each rule pairs
//! a [`Condition`] on the actor, target and request with an [`Outcome`]. The
//! first rule whose condition holds and that reaches a verdict wins; running
//! off the end denies.
//!
//! Evaluation order: localhost allow, invariants, superuser allow, rules.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

use super::actor::Actor;
use super::permission::*;
use crate::error::AppError;
use crate::models::user::User;

const MISSING_PERMISSION: &str = "missing permission";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateUser,
    ModifyUser,
    GetUser,
    ListUsers,
    DeleteUser,
    ListUserPermissions,
    SetUserPermissions,
    ListUserGroups,
    SetUserGroups,
    CreateGroup,
    ModifyGroup,
    GetGroup,
    ListGroups,
    DeleteGroup,
    ListGroupPermissions,
    SetGroupPermissions,
    RegisterPermissions,
    GetPermission,
    ListPermissions,
    IsGranted,
    BelongsTo,
    CreateRefreshToken,
    DisableRefreshToken,
    RevokeRefreshToken,
    ListRefreshTokens,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateUser => "create_user",
            Operation::ModifyUser => "modify_user",
            Operation::GetUser => "get_user",
            Operation::ListUsers => "list_users",
            Operation::DeleteUser => "delete_user",
            Operation::ListUserPermissions => "list_user_permissions",
            Operation::SetUserPermissions => "set_user_permissions",
            Operation::ListUserGroups => "list_user_groups",
            Operation::SetUserGroups => "set_user_groups",
            Operation::CreateGroup => "create_group",
            Operation::ModifyGroup => "modify_group",
            Operation::GetGroup => "get_group",
            Operation::ListGroups => "list_groups",
            Operation::DeleteGroup => "delete_group",
            Operation::ListGroupPermissions => "list_group_permissions",
            Operation::SetGroupPermissions => "set_group_permissions",
            Operation::RegisterPermissions => "register_permissions",
            Operation::GetPermission => "get_permission",
            Operation::ListPermissions => "list_permissions",
            Operation::IsGranted => "is_granted",
            Operation::BelongsTo => "belongs_to",
            Operation::CreateRefreshToken => "create_refresh_token",
            Operation::DisableRefreshToken => "disable_refresh_token",
            Operation::RevokeRefreshToken => "revoke_refresh_token",
            Operation::ListRefreshTokens => "list_refresh_tokens",
        }
    }
}

/// Attributes of the target entity and of the request the rules look at.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    /// User the request is about.
    pub target_id: Option<i64>,
    /// Owner of the target: `created_by` of a user, `user_id` of a refresh
    /// token, the `created_by` filter of a list.
    pub owner_id: Option<i64>,
    pub target_is_superuser: bool,
    pub target_is_staff: bool,
    /// `is_superuser` value carried by the request, if any.
    pub requests_superuser: Option<bool>,
    /// `is_staff` value carried by the request, if any.
    pub requests_staff: Option<bool>,
    pub secure_password: bool,
}

impl Facts {
    pub fn none() -> Self {
        Self::default()
    }

    /// Facts about an existing user record.
    pub fn user(target: &User) -> Self {
        Self {
            target_id: Some(target.id),
            owner_id: target.created_by,
            target_is_superuser: target.is_superuser,
            target_is_staff: target.is_staff,
            ..Self::default()
        }
    }

    /// The request is about the user with this id.
    pub fn subject(user_id: i64) -> Self {
        Self {
            target_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn owned_by(owner_id: Option<i64>) -> Self {
        Self {
            owner_id,
            ..Self::default()
        }
    }

    pub fn requesting(mut self, is_superuser: Option<bool>, is_staff: Option<bool>) -> Self {
        self.requests_superuser = is_superuser;
        self.requests_staff = is_staff;
        self
    }

    pub fn with_secure_password(mut self, secure_password: bool) -> Self {
        self.secure_password = secure_password;
        self
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Always,
    SelfTarget,
    Owner,
    TargetSuperuser,
    TargetStaff,
    RequestsSuperuser,
    RevokesSuperuser,
    RequestsStaff,
    SecurePassword,
    All(Vec<Condition>),
}

impl Condition {
    fn holds(&self, actor: &Actor, facts: &Facts) -> bool {
        let actor_id = actor.id();
        match self {
            Condition::Always => true,
            Condition::SelfTarget => actor_id.is_some() && facts.target_id == actor_id,
            Condition::Owner => actor_id.is_some() && facts.owner_id == actor_id,
            Condition::TargetSuperuser => facts.target_is_superuser,
            Condition::TargetStaff => facts.target_is_staff,
            Condition::RequestsSuperuser => facts.requests_superuser == Some(true),
            Condition::RevokesSuperuser => {
                facts.target_is_superuser && facts.requests_superuser == Some(false)
            }
            Condition::RequestsStaff => facts.requests_staff == Some(true),
            Condition::SecurePassword => facts.secure_password,
            Condition::All(all) => all.iter().all(|c| c.holds(actor, facts)),
        }
    }
}

#[derive(Debug, Clone)]
enum Need {
    Any(Vec<Permission>),
    All(Vec<Permission>),
}

impl Need {
    fn satisfied_by(&self, actor: &Actor) -> bool {
        match self {
            Need::Any(permissions) => actor.has_any(permissions),
            Need::All(permissions) => permissions.iter().all(|p| actor.has(p)),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Allow,
    Deny(&'static str),
    /// Requirement that must hold before later rules are consulted.
    Demand(Need),
    /// Verdict: allowed iff the need is met.
    Grant(Need),
}

#[derive(Debug, Clone)]
struct Rule {
    when: Condition,
    then: Outcome,
}

#[derive(Debug, Clone, Default)]
struct Policy {
    invariants: Vec<Rule>,
    rules: Vec<Rule>,
}

fn rule(when: Condition, then: Outcome) -> Rule {
    Rule { when, then }
}

fn any(permissions: &[Permission]) -> Need {
    Need::Any(permissions.to_vec())
}

fn all(permissions: &[Permission]) -> Need {
    Need::All(permissions.to_vec())
}

fn both(a: Condition, b: Condition) -> Condition {
    Condition::All(vec![a, b])
}

fn grant(need: Need) -> Policy {
    Policy {
        invariants: Vec::new(),
        rules: vec![rule(Condition::Always, Outcome::Grant(need))],
    }
}

/// Owner / stranger x staff / non-staff matrix shared by get, modify and
/// delete of a user.
fn ownership_matrix(
    stranger: Permission,
    owner: Permission,
    staff_stranger: Permission,
    staff_owner: Permission,
) -> Vec<Rule> {
    use Condition::*;

    vec![
        rule(
            both(TargetStaff, Owner),
            Outcome::Grant(any(&[staff_stranger.clone(), staff_owner])),
        ),
        rule(TargetStaff, Outcome::Grant(any(&[staff_stranger]))),
        rule(Owner, Outcome::Grant(any(&[stranger.clone(), owner]))),
        rule(Always, Outcome::Grant(any(&[stranger]))),
    ]
}

fn self_or(need: Need) -> Policy {
    Policy {
        invariants: Vec::new(),
        rules: vec![
            rule(Condition::SelfTarget, Outcome::Allow),
            rule(Condition::Always, Outcome::Grant(need)),
        ],
    }
}

fn owner_or_stranger(stranger: Permission, owner: Permission) -> Policy {
    Policy {
        invariants: Vec::new(),
        rules: vec![
            rule(
                Condition::Owner,
                Outcome::Grant(any(&[stranger.clone(), owner])),
            ),
            rule(Condition::Always, Outcome::Grant(any(&[stranger]))),
        ],
    }
}

static POLICIES: Lazy<HashMap<Operation, Policy>> = Lazy::new(|| {
    use Condition::*;
    use Operation::*;

    let mut policies = HashMap::new();

    policies.insert(
        CreateUser,
        Policy {
            invariants: Vec::new(),
            rules: vec![
                rule(
                    RequestsSuperuser,
                    Outcome::Deny("only a superuser can create a superuser"),
                ),
                rule(
                    SecurePassword,
                    Outcome::Deny("only a superuser can set a secure password"),
                ),
                rule(RequestsStaff, Outcome::Grant(all(&[USER_CAN_CREATE_STAFF]))),
                rule(
                    Always,
                    Outcome::Grant(any(&[USER_CAN_CREATE, USER_CAN_CREATE_STAFF])),
                ),
            ],
        },
    );

    let mut modify = vec![
        rule(
            Always,
            Outcome::Demand(any(&[
                USER_CAN_MODIFY_AS_STRANGER,
                USER_CAN_MODIFY_AS_OWNER,
                USER_CAN_MODIFY_STAFF_AS_STRANGER,
                USER_CAN_MODIFY_STAFF_AS_OWNER,
            ])),
        ),
        rule(
            TargetSuperuser,
            Outcome::Deny("a superuser can only be modified by a superuser"),
        ),
        rule(
            RequestsSuperuser,
            Outcome::Deny("only a superuser can grant superuser status"),
        ),
        rule(
            SecurePassword,
            Outcome::Deny("only a superuser can set a secure password"),
        ),
        rule(RequestsStaff, Outcome::Demand(all(&[USER_CAN_CREATE_STAFF]))),
    ];
    modify.extend(ownership_matrix(
        USER_CAN_MODIFY_AS_STRANGER,
        USER_CAN_MODIFY_AS_OWNER,
        USER_CAN_MODIFY_STAFF_AS_STRANGER,
        USER_CAN_MODIFY_STAFF_AS_OWNER,
    ));
    policies.insert(
        ModifyUser,
        Policy {
            invariants: vec![rule(
                both(SelfTarget, RevokesSuperuser),
                Outcome::Deny("a superuser cannot revoke their own superuser status"),
            )],
            rules: modify,
        },
    );

    let mut get = vec![rule(
        TargetSuperuser,
        Outcome::Deny("a superuser can only be retrieved by a superuser"),
    )];
    get.extend(ownership_matrix(
        USER_CAN_RETRIEVE_AS_STRANGER,
        USER_CAN_RETRIEVE_AS_OWNER,
        USER_CAN_RETRIEVE_STAFF_AS_STRANGER,
        USER_CAN_RETRIEVE_STAFF_AS_OWNER,
    ));
    policies.insert(
        GetUser,
        Policy {
            invariants: Vec::new(),
            rules: get,
        },
    );

    let mut delete = vec![rule(
        TargetSuperuser,
        Outcome::Deny("a superuser can only be deleted by a superuser"),
    )];
    delete.extend(ownership_matrix(
        USER_CAN_DELETE_AS_STRANGER,
        USER_CAN_DELETE_AS_OWNER,
        USER_CAN_DELETE_STAFF_AS_STRANGER,
        USER_CAN_DELETE_STAFF_AS_OWNER,
    ));
    policies.insert(
        DeleteUser,
        Policy {
            invariants: vec![rule(
                SelfTarget,
                Outcome::Deny("a user cannot delete their own account"),
            )],
            rules: delete,
        },
    );

    policies.insert(
        ListUsers,
        Policy {
            invariants: Vec::new(),
            rules: vec![
                rule(
                    RequestsSuperuser,
                    Outcome::Deny("only a superuser can list superusers"),
                ),
                rule(
                    both(RequestsStaff, Owner),
                    Outcome::Grant(any(&[
                        USER_CAN_RETRIEVE_STAFF_AS_STRANGER,
                        USER_CAN_RETRIEVE_STAFF_AS_OWNER,
                    ])),
                ),
                rule(
                    RequestsStaff,
                    Outcome::Grant(any(&[USER_CAN_RETRIEVE_STAFF_AS_STRANGER])),
                ),
                rule(
                    Owner,
                    Outcome::Grant(any(&[
                        USER_CAN_RETRIEVE_AS_STRANGER,
                        USER_CAN_RETRIEVE_AS_OWNER,
                    ])),
                ),
                rule(Always, Outcome::Grant(any(&[USER_CAN_RETRIEVE_AS_STRANGER]))),
            ],
        },
    );

    policies.insert(ListUserPermissions, self_or(any(&[USER_PERMISSION_CAN_RETRIEVE])));
    policies.insert(
        SetUserPermissions,
        grant(all(&[USER_PERMISSION_CAN_CREATE, USER_PERMISSION_CAN_DELETE])),
    );
    policies.insert(ListUserGroups, self_or(any(&[USER_GROUP_CAN_RETRIEVE])));
    policies.insert(
        SetUserGroups,
        grant(all(&[USER_GROUP_CAN_CREATE, USER_GROUP_CAN_DELETE])),
    );

    policies.insert(CreateGroup, grant(all(&[GROUP_CAN_CREATE])));
    policies.insert(ModifyGroup, grant(all(&[GROUP_CAN_MODIFY])));
    policies.insert(GetGroup, grant(all(&[GROUP_CAN_RETRIEVE])));
    policies.insert(ListGroups, grant(all(&[GROUP_CAN_RETRIEVE])));
    policies.insert(DeleteGroup, grant(all(&[GROUP_CAN_DELETE])));
    policies.insert(
        ListGroupPermissions,
        grant(all(&[GROUP_PERMISSION_CAN_RETRIEVE])),
    );
    policies.insert(
        SetGroupPermissions,
        grant(all(&[GROUP_PERMISSION_CAN_CREATE, GROUP_PERMISSION_CAN_DELETE])),
    );

    policies.insert(
        RegisterPermissions,
        grant(all(&[
            PERMISSION_CAN_CREATE,
            PERMISSION_CAN_DELETE,
            PERMISSION_CAN_MODIFY,
        ])),
    );
    policies.insert(GetPermission, grant(all(&[PERMISSION_CAN_RETRIEVE])));
    policies.insert(ListPermissions, grant(all(&[PERMISSION_CAN_RETRIEVE])));

    policies.insert(
        IsGranted,
        self_or(all(&[USER_PERMISSION_CAN_CHECK_GRANTING_AS_STRANGER])),
    );
    policies.insert(
        BelongsTo,
        self_or(all(&[USER_GROUP_CAN_CHECK_BELONGING_AS_STRANGER])),
    );

    policies.insert(CreateRefreshToken, grant(all(&[REFRESH_TOKEN_CAN_CREATE])));
    policies.insert(
        DisableRefreshToken,
        owner_or_stranger(
            REFRESH_TOKEN_CAN_DISABLE_AS_STRANGER,
            REFRESH_TOKEN_CAN_DISABLE_AS_OWNER,
        ),
    );
    policies.insert(
        RevokeRefreshToken,
        owner_or_stranger(
            REFRESH_TOKEN_CAN_REVOKE_AS_STRANGER,
            REFRESH_TOKEN_CAN_REVOKE_AS_OWNER,
        ),
    );
    policies.insert(
        ListRefreshTokens,
        grant(any(&[
            REFRESH_TOKEN_CAN_RETRIEVE_AS_STRANGER,
            REFRESH_TOKEN_CAN_RETRIEVE_AS_OWNER,
        ])),
    );

    policies
});

enum Verdict {
    Allow,
    Deny(&'static str),
}

fn evaluate(actor: &Actor, operation: Operation, facts: &Facts) -> Verdict {
    if actor.is_local() {
        return Verdict::Allow;
    }

    let Some(policy) = POLICIES.get(&operation) else {
        return Verdict::Deny(MISSING_PERMISSION);
    };

    for rule in policy.invariants.iter().filter(|r| r.when.holds(actor, facts)) {
        if let Outcome::Deny(hint) = rule.then {
            return Verdict::Deny(hint);
        }
    }

    if actor.is_superuser() {
        return Verdict::Allow;
    }

    for rule in policy.rules.iter().filter(|r| r.when.holds(actor, facts)) {
        match &rule.then {
            Outcome::Allow => return Verdict::Allow,
            Outcome::Deny(hint) => return Verdict::Deny(*hint),
            Outcome::Demand(need) if need.satisfied_by(actor) => continue,
            Outcome::Demand(_) => return Verdict::Deny(MISSING_PERMISSION),
            Outcome::Grant(need) if need.satisfied_by(actor) => return Verdict::Allow,
            Outcome::Grant(_) => return Verdict::Deny(MISSING_PERMISSION),
        }
    }

    Verdict::Deny(MISSING_PERMISSION)
}

/// Decides whether `actor` may perform `operation`. Denials are logged and
/// counted; the hint tells "missing permission" apart from a constraint on
/// the target, nothing more.
pub fn check(actor: &Actor, operation: Operation, facts: &Facts) -> Result<(), AppError> {
    match evaluate(actor, operation, facts) {
        Verdict::Allow => Ok(()),
        Verdict::Deny(hint) => {
            warn!(
                actor_id = ?actor.id(),
                operation = operation.as_str(),
                hint,
                "Firewall denied request"
            );
            metrics::counter!("charon_firewall_denials_total", "operation" => operation.as_str())
                .increment(1);
            Err(AppError::permission_denied(hint))
        }
    }
}
