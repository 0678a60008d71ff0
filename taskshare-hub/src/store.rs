//! Storage contract and the in-memory store backing the hub.
//!
//! The enforcement layer only needs a handful of abstract capabilities per
//! entity kind: fetch an entity together with the caller's own grants, create,
//! update and delete it, and create, update and delete grant rows. [`Store`]
//! names exactly those. [`MemoryStore`] implements them over `HashMap`s behind
//! a single [`RwLock`], which gives the two guarantees the core relies on:
//!
//! - grant uniqueness per `(entity, user)` is checked and the row inserted in
//!   one write section, so concurrent duplicate grants yield exactly one
//!   success and one [`StoreError::UniqueViolation`];
//! - deleting a list cascades to its tasks and every share row on both.
//!
//! Entries are ephemeral and lost on restart.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use taskshare_proto::access::{CallerGrants, Permission};
use taskshare_proto::ids::{ListId, TaskId, Timestamp, UserId};
use taskshare_proto::model::{
    List, ListPatch, ListShare, NewList, NewTask, Notification, Task, TaskPatch, TaskShare,
    TaskStatus,
};

/// Maximum number of notifications retained per user.
const MAX_NOTIFICATIONS_PER_USER: usize = 200;

/// Errors reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated")]
    UniqueViolation,
    /// The row addressed by the write does not exist.
    #[error("row not found")]
    RowNotFound,
    /// Any other backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// A list together with the caller's grant on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRecord {
    /// The list, hydrated with its shares.
    pub list: List,
    /// The caller's own list grant, if any.
    pub grant: Option<Permission>,
}

/// A task together with the caller's grants on it and its parent list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// The task, hydrated with its shares. `owner_id` is the list owner.
    pub task: Task,
    /// The caller's grants on the parent list and on the task.
    pub grants: CallerGrants,
}

/// Abstract storage capabilities consumed by the enforcement layer.
///
/// Every successful write returns the resulting entity fully hydrated with
/// its grant rows.
pub trait Store: Send + Sync + 'static {
    /// Loads a list with the caller's own grant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn find_list(&self, id: ListId, caller: &UserId) -> Result<Option<ListRecord>, StoreError>;

    /// Loads a task with the caller's own list and task grants.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn find_task(&self, id: TaskId, caller: &UserId) -> Result<Option<TaskRecord>, StoreError>;

    /// All tasks of a list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn list_tasks(&self, list_id: ListId) -> Result<Vec<Task>, StoreError>;

    /// Lists owned by `user` or carrying a list grant for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn lists_for(&self, user: &UserId) -> Result<Vec<List>, StoreError>;

    /// Tasks carrying a task grant for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn tasks_shared_with(&self, user: &UserId) -> Result<Vec<Task>, StoreError>;

    /// Creates a list owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn create_list(&self, owner: &UserId, input: &NewList) -> Result<List, StoreError>;

    /// Applies a patch to a list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the list does not exist.
    fn update_list(&self, id: ListId, patch: &ListPatch) -> Result<List, StoreError>;

    /// Deletes a list, its tasks, and all their share rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the list does not exist.
    fn delete_list(&self, id: ListId) -> Result<(), StoreError>;

    /// Creates a task under a list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the list does not exist.
    fn create_task(&self, list_id: ListId, input: &NewTask) -> Result<Task, StoreError>;

    /// Applies a patch to a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the task does not exist.
    fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, StoreError>;

    /// Deletes a task and its share rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the task does not exist.
    fn delete_task(&self, id: TaskId) -> Result<(), StoreError>;

    /// Inserts a list share row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the pair already has a row,
    /// or [`StoreError::RowNotFound`] if the list does not exist.
    fn create_list_share(
        &self,
        list_id: ListId,
        user: &UserId,
        permission: Permission,
    ) -> Result<List, StoreError>;

    /// Changes the level of a list share row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the list or the row does not exist.
    fn update_list_share(
        &self,
        list_id: ListId,
        user: &UserId,
        permission: Permission,
    ) -> Result<List, StoreError>;

    /// Deletes a list share row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the list or the row does not exist.
    fn delete_list_share(&self, list_id: ListId, user: &UserId) -> Result<List, StoreError>;

    /// Inserts a task share row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the pair already has a row,
    /// or [`StoreError::RowNotFound`] if the task does not exist.
    fn create_task_share(
        &self,
        task_id: TaskId,
        user: &UserId,
        permission: Permission,
    ) -> Result<Task, StoreError>;

    /// Changes the level of a task share row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the task or the row does not exist.
    fn update_task_share(
        &self,
        task_id: TaskId,
        user: &UserId,
        permission: Permission,
    ) -> Result<Task, StoreError>;

    /// Deletes a task share row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if the task or the row does not exist.
    fn delete_task_share(&self, task_id: TaskId, user: &UserId) -> Result<Task, StoreError>;

    /// Records an informational notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn push_notification(&self, notification: Notification) -> Result<(), StoreError>;

    /// Notifications for `user`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn notifications_for(&self, user: &UserId) -> Result<Vec<Notification>, StoreError>;
}

#[derive(Default)]
struct Tables {
    lists: HashMap<ListId, List>,
    tasks: HashMap<TaskId, Task>,
    notifications: HashMap<UserId, VecDeque<Notification>>,
}

/// In-memory [`Store`].
///
/// Thread-safe via [`RwLock`]; every write runs inside a single write
/// section, so constraint checks and inserts are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lists currently stored.
    #[must_use]
    pub fn list_count(&self) -> usize {
        self.tables.read().lists.len()
    }

    /// Number of tasks currently stored.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tables.read().tasks.len()
    }
}

impl Store for MemoryStore {
    fn find_list(&self, id: ListId, caller: &UserId) -> Result<Option<ListRecord>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.lists.get(&id).map(|list| ListRecord {
            grant: list.grant_for(caller),
            list: list.clone(),
        }))
    }

    fn find_task(&self, id: TaskId, caller: &UserId) -> Result<Option<TaskRecord>, StoreError> {
        let tables = self.tables.read();
        let Some(task) = tables.tasks.get(&id) else {
            return Ok(None);
        };
        let grants = CallerGrants {
            list: tables
                .lists
                .get(&task.list_id)
                .and_then(|list| list.grant_for(caller)),
            task: task.grant_for(caller),
        };
        Ok(Some(TaskRecord {
            task: task.clone(),
            grants,
        }))
    }

    fn list_tasks(&self, list_id: ListId) -> Result<Vec<Task>, StoreError> {
        let tables = self.tables.read();
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| t.list_id == list_id)
            .cloned()
            .collect();
        drop(tables);
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    fn lists_for(&self, user: &UserId) -> Result<Vec<List>, StoreError> {
        let tables = self.tables.read();
        let mut lists: Vec<List> = tables
            .lists
            .values()
            .filter(|l| &l.owner_id == user || l.grant_for(user).is_some())
            .cloned()
            .collect();
        drop(tables);
        lists.sort_by_key(|l| l.created_at);
        Ok(lists)
    }

    fn tasks_shared_with(&self, user: &UserId) -> Result<Vec<Task>, StoreError> {
        let tables = self.tables.read();
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| t.grant_for(user).is_some())
            .cloned()
            .collect();
        drop(tables);
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    fn create_list(&self, owner: &UserId, input: &NewList) -> Result<List, StoreError> {
        let now = Timestamp::now();
        let list = List {
            id: ListId::new(),
            name: input.name.clone(),
            description: input.description.clone(),
            owner_id: owner.clone(),
            shares: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().lists.insert(list.id, list.clone());
        Ok(list)
    }

    fn update_list(&self, id: ListId, patch: &ListPatch) -> Result<List, StoreError> {
        let mut tables = self.tables.write();
        let list = tables.lists.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        patch.apply(list, Timestamp::now());
        Ok(list.clone())
    }

    fn delete_list(&self, id: ListId) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.lists.remove(&id).is_none() {
            return Err(StoreError::RowNotFound);
        }
        tables.tasks.retain(|_, task| task.list_id != id);
        Ok(())
    }

    fn create_task(&self, list_id: ListId, input: &NewTask) -> Result<Task, StoreError> {
        let mut tables = self.tables.write();
        let owner_id = tables
            .lists
            .get(&list_id)
            .map(|l| l.owner_id.clone())
            .ok_or(StoreError::RowNotFound)?;
        let now = Timestamp::now();
        let completed = input.status == TaskStatus::Completed;
        let task = Task {
            id: TaskId::new(),
            list_id,
            owner_id,
            name: input.name.clone(),
            description: input.description.clone(),
            status: input.status,
            priority: input.priority,
            due_date: input.due_date,
            favorite: input.favorite,
            completed,
            completed_at: completed.then_some(now),
            shares: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        tables.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        patch.apply(task, Timestamp::now());
        Ok(task.clone())
    }

    fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.tables
            .write()
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::RowNotFound)
    }

    fn create_list_share(
        &self,
        list_id: ListId,
        user: &UserId,
        permission: Permission,
    ) -> Result<List, StoreError> {
        let mut tables = self.tables.write();
        let list = tables.lists.get_mut(&list_id).ok_or(StoreError::RowNotFound)?;
        if list.shares.iter().any(|s| &s.user_id == user) {
            return Err(StoreError::UniqueViolation);
        }
        list.shares.push(ListShare {
            list_id,
            user_id: user.clone(),
            permission,
            created_at: Timestamp::now(),
        });
        Ok(list.clone())
    }

    fn update_list_share(
        &self,
        list_id: ListId,
        user: &UserId,
        permission: Permission,
    ) -> Result<List, StoreError> {
        let mut tables = self.tables.write();
        let list = tables.lists.get_mut(&list_id).ok_or(StoreError::RowNotFound)?;
        let share = list
            .shares
            .iter_mut()
            .find(|s| &s.user_id == user)
            .ok_or(StoreError::RowNotFound)?;
        share.permission = permission;
        Ok(list.clone())
    }

    fn delete_list_share(&self, list_id: ListId, user: &UserId) -> Result<List, StoreError> {
        let mut tables = self.tables.write();
        let list = tables.lists.get_mut(&list_id).ok_or(StoreError::RowNotFound)?;
        let before = list.shares.len();
        list.shares.retain(|s| &s.user_id != user);
        if list.shares.len() == before {
            return Err(StoreError::RowNotFound);
        }
        Ok(list.clone())
    }

    fn create_task_share(
        &self,
        task_id: TaskId,
        user: &UserId,
        permission: Permission,
    ) -> Result<Task, StoreError> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&task_id).ok_or(StoreError::RowNotFound)?;
        if task.shares.iter().any(|s| &s.user_id == user) {
            return Err(StoreError::UniqueViolation);
        }
        task.shares.push(TaskShare {
            task_id,
            user_id: user.clone(),
            permission,
            created_at: Timestamp::now(),
        });
        Ok(task.clone())
    }

    fn update_task_share(
        &self,
        task_id: TaskId,
        user: &UserId,
        permission: Permission,
    ) -> Result<Task, StoreError> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&task_id).ok_or(StoreError::RowNotFound)?;
        let share = task
            .shares
            .iter_mut()
            .find(|s| &s.user_id == user)
            .ok_or(StoreError::RowNotFound)?;
        share.permission = permission;
        Ok(task.clone())
    }

    fn delete_task_share(&self, task_id: TaskId, user: &UserId) -> Result<Task, StoreError> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&task_id).ok_or(StoreError::RowNotFound)?;
        let before = task.shares.len();
        task.shares.retain(|s| &s.user_id != user);
        if task.shares.len() == before {
            return Err(StoreError::RowNotFound);
        }
        Ok(task.clone())
    }

    fn push_notification(&self, notification: Notification) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let queue = tables
            .notifications
            .entry(notification.user_id.clone())
            .or_default();
        queue.push_back(notification);
        if queue.len() > MAX_NOTIFICATIONS_PER_USER {
            queue.pop_front();
        }
        Ok(())
    }

    fn notifications_for(&self, user: &UserId) -> Result<Vec<Notification>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .notifications
            .get(user)
            .map(|queue| queue.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}
