//! Accessible-set projection over a [`Cache`].
//!
//! [`project`] is a pure function: it derives which lists and tasks the user
//! can see, and at what level, from the cached entities and their grant rows.
//! Task access merges the list grant and the task grant to the stronger of
//! the two; the strict resolution used for destructive operations never
//! applies to a read-side view.

use std::collections::{BTreeMap, BTreeSet};

use taskshare_proto::access::{self, Access, Permission};
use taskshare_proto::ids::{ListId, TaskId, UserId};
use taskshare_proto::model::caller_grants;

use crate::cache::Cache;

/// What a user can see and at which level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessibleSet {
    /// Lists the user owns.
    pub owned_lists: BTreeSet<ListId>,
    /// Lists the user holds a grant on.
    pub shared_lists: BTreeSet<ListId>,
    /// Union of owned and shared lists.
    pub accessible_lists: BTreeSet<ListId>,
    /// Tasks of lists the user owns.
    pub owned_tasks: BTreeSet<TaskId>,
    /// Tasks visible through a list grant or a direct task grant.
    pub shared_tasks: BTreeSet<TaskId>,
    /// Union of owned and shared tasks.
    pub accessible_tasks: BTreeSet<TaskId>,
    /// Effective access per accessible list.
    pub list_access: BTreeMap<ListId, Access>,
    /// Effective access per accessible task.
    pub task_access: BTreeMap<TaskId, Access>,
}

impl AccessibleSet {
    /// List rooms the client should be subscribed to.
    #[must_use]
    pub fn subscriptions(&self) -> BTreeSet<ListId> {
        self.accessible_lists.clone()
    }

    /// Whether the user can act on `list_id` at level `need`.
    #[must_use]
    pub fn can_list(&self, list_id: ListId, need: Permission) -> bool {
        self.list_access
            .get(&list_id)
            .is_some_and(|a| a.satisfies(need))
    }

    /// Whether the user can act on `task_id` at level `need`.
    #[must_use]
    pub fn can_task(&self, task_id: TaskId, need: Permission) -> bool {
        self.task_access
            .get(&task_id)
            .is_some_and(|a| a.satisfies(need))
    }
}

/// Derives the accessible set of `user` from `cache`.
#[must_use]
pub fn project(cache: &Cache, user: &UserId) -> AccessibleSet {
    let mut set = AccessibleSet::default();

    for list in cache.lists() {
        let Some(access) = access::list_access(user, &list.owner_id, list.grant_for(user)) else {
            continue;
        };
        match access {
            Access::Owner => set.owned_lists.insert(list.id),
            Access::Shared(_) => set.shared_lists.insert(list.id),
        };
        set.accessible_lists.insert(list.id);
        set.list_access.insert(list.id, access);
    }

    for task in cache.tasks() {
        let grants = caller_grants(user, cache.list(task.list_id), task);
        let Some(access) = access::task_access(user, &task.owner_id, grants) else {
            continue;
        };
        match access {
            Access::Owner => set.owned_tasks.insert(task.id),
            Access::Shared(_) => set.shared_tasks.insert(task.id),
        };
        set.accessible_tasks.insert(task.id);
        set.task_access.insert(task.id, access);
    }

    set
}
