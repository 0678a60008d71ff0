//! Permission lattice and resolution engine.
//!
//! Authority over a list or task comes from three independent sources:
//! ownership, a list-level grant, and a task-level grant. The functions here
//! combine them into a single [`Decision`]. They are pure and perform no I/O,
//! so the hub's enforcement layer and the client's projector share them.
//!
//! Precedence is owner > list grant > task grant. Task operations run in
//! either [`Mode::Lenient`] (task grants count) or [`Mode::Strict`] (only
//! ownership or a list grant count).

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Graduated access level conferred by a grant.
///
/// Variant order defines the lattice: `View < Edit < Admin`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Permission {
    /// Read the entity.
    #[default]
    View,
    /// Modify the entity's fields and create tasks under a list.
    Edit,
    /// Delete the entity and manage its grants.
    Admin,
}

impl Permission {
    /// All levels, weakest first.
    pub const ALL: [Self; 3] = [Self::View, Self::Edit, Self::Admin];

    /// Numeric rank of the level: VIEW=1, EDIT=2, ADMIN=3.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::View => 1,
            Self::Edit => 2,
            Self::Admin => 3,
        }
    }

    /// Whether holding `self` is enough for an operation that needs `need`.
    #[must_use]
    pub const fn satisfies(self, need: Self) -> bool {
        self.level() >= need.level()
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "VIEW"),
            Self::Edit => write!(f, "EDIT"),
            Self::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Error returned when parsing an unknown permission name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission level: {0} (expected view, edit or admin)")]
pub struct UnknownPermission(pub String);

impl std::str::FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "edit" => Ok(Self::Edit),
            "admin" => Ok(Self::Admin),
            _ => Err(UnknownPermission(s.to_string())),
        }
    }
}

/// Outcome of a resolution.
///
/// The two deny variants exist for diagnostics and tests only; callers
/// collapse both into a single forbidden result so grant existence never
/// leaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The caller may perform the operation.
    Allow,
    /// The caller holds an applicable grant, but it is below the required level.
    DenyInsufficient,
    /// The caller holds no applicable grant and is not the owner.
    DenyNone,
}

impl Decision {
    /// Whether the decision permits the operation.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    const fn deny(had_grant: bool) -> Self {
        if had_grant {
            Self::DenyInsufficient
        } else {
            Self::DenyNone
        }
    }
}

/// Strictness of a task resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Task-level grants are consulted after list-level grants.
    Lenient,
    /// Only ownership and list-level grants count; task grants are ignored.
    Strict,
}

/// The caller's own grants relevant to one entity.
///
/// For a list, only `list` is meaningful. For a task, `list` is the caller's
/// grant on the task's parent list and `task` the grant on the task itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerGrants {
    /// Grant on the list (or the task's parent list).
    pub list: Option<Permission>,
    /// Grant on the task itself.
    pub task: Option<Permission>,
}

impl CallerGrants {
    /// No grants at all.
    pub const NONE: Self = Self {
        list: None,
        task: None,
    };

    /// Grants consisting of a single list-level grant.
    #[must_use]
    pub const fn list(permission: Permission) -> Self {
        Self {
            list: Some(permission),
            task: None,
        }
    }

    /// Grants consisting of a single task-level grant.
    #[must_use]
    pub const fn task(permission: Permission) -> Self {
        Self {
            list: None,
            task: Some(permission),
        }
    }
}

/// Resolves a list operation.
///
/// The owner is always allowed; otherwise the caller's list grant must
/// satisfy `required`.
#[must_use]
pub fn resolve_list(
    caller: &UserId,
    owner: &UserId,
    list_grant: Option<Permission>,
    required: Permission,
) -> Decision {
    if caller == owner {
        return Decision::Allow;
    }
    match list_grant {
        Some(have) if have.satisfies(required) => Decision::Allow,
        Some(_) => Decision::DenyInsufficient,
        None => Decision::DenyNone,
    }
}

/// Resolves a task operation against the owner of the task's list.
///
/// A list grant dominates a task grant. In [`Mode::Strict`] the task grant is
/// never consulted, so a collaborator holding ADMIN on a single task cannot
/// perform list-scoped actions such as deleting it.
#[must_use]
pub fn resolve_task(
    caller: &UserId,
    owner: &UserId,
    grants: CallerGrants,
    required: Permission,
    mode: Mode,
) -> Decision {
    if caller == owner {
        return Decision::Allow;
    }
    if grants.list.is_some_and(|have| have.satisfies(required)) {
        return Decision::Allow;
    }
    if mode == Mode::Strict {
        return Decision::deny(grants.list.is_some());
    }
    if grants.task.is_some_and(|have| have.satisfies(required)) {
        return Decision::Allow;
    }
    Decision::deny(grants.list.is_some() || grants.task.is_some())
}

/// Effective access a user holds on an entity, for read-side projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// The user owns the entity (or the task's list).
    Owner,
    /// The user holds a grant at the given level.
    Shared(Permission),
}

impl Access {
    /// Permission equivalent of this access; owners act at ADMIN.
    #[must_use]
    pub const fn permission(self) -> Permission {
        match self {
            Self::Owner => Permission::Admin,
            Self::Shared(p) => p,
        }
    }

    /// Whether this access is enough for `need` under lenient resolution.
    #[must_use]
    pub const fn satisfies(self, need: Permission) -> bool {
        self.permission().satisfies(need)
    }
}

/// Effective access on a list, or `None` if the user cannot see it.
#[must_use]
pub fn list_access(
    user: &UserId,
    owner: &UserId,
    list_grant: Option<Permission>,
) -> Option<Access> {
    if user == owner {
        return Some(Access::Owner);
    }
    list_grant.map(Access::Shared)
}

/// Effective access on a task, or `None` if the user cannot see it.
///
/// List and task grants merge to the stronger of the two. This matches
/// lenient resolution: a required level is allowed iff either grant
/// satisfies it.
#[must_use]
pub fn task_access(user: &UserId, owner: &UserId, grants: CallerGrants) -> Option<Access> {
    if user == owner {
        return Some(Access::Owner);
    }
    grants.list.max(grants.task).map(Access::Shared)
}
