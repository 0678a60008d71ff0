//! Client-side entity cache and its pure reducer.
//!
//! A [`Cache`] is an immutable snapshot of every list and task the client has
//! been told about. [`Cache::apply`] folds one [`CacheUpdate`] into a new
//! snapshot without touching the old one, so a projection computed from a
//! previous snapshot stays valid while the next one is built.

use std::collections::BTreeMap;

use taskshare_proto::ids::{ListId, TaskId, UserId};
use taskshare_proto::model::{List, Snapshot, Task};
use taskshare_proto::wire::{HubEvent, Payload};

/// Input to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    /// Result of an initial or refreshed fetch; replaces everything.
    Loaded(Snapshot),
    /// An event pushed by the hub.
    Event(HubEvent),
    /// The payload of a request the hub confirmed.
    Confirmed(Payload),
}

/// Immutable snapshot of cached lists and tasks for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cache {
    user: UserId,
    lists: BTreeMap<ListId, List>,
    tasks: BTreeMap<TaskId, Task>,
}

impl Cache {
    /// An empty cache for `user`.
    #[must_use]
    pub const fn new(user: UserId) -> Self {
        Self {
            user,
            lists: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// The user this cache belongs to.
    #[must_use]
    pub const fn user(&self) -> &UserId {
        &self.user
    }

    /// A cached list.
    #[must_use]
    pub fn list(&self, id: ListId) -> Option<&List> {
        self.lists.get(&id)
    }

    /// A cached task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All cached lists, ordered by id.
    pub fn lists(&self) -> impl Iterator<Item = &List> {
        self.lists.values()
    }

    /// All cached tasks, ordered by id.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Cached tasks belonging to `list_id`.
    pub fn tasks_of(&self, list_id: ListId) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(move |t| t.list_id == list_id)
    }

    /// Folds `update` into a new snapshot.
    #[must_use]
    pub fn apply(&self, update: &CacheUpdate) -> Self {
        let mut next = self.clone();
        match update {
            CacheUpdate::Loaded(snapshot) => {
                next.lists = snapshot.lists.iter().map(|l| (l.id, l.clone())).collect();
                next.tasks = snapshot.tasks.iter().map(|t| (t.id, t.clone())).collect();
            }
            CacheUpdate::Event(event) => next.apply_event(event),
            CacheUpdate::Confirmed(payload) => next.apply_payload(payload),
        }
        next
    }

    fn apply_event(&mut self, event: &HubEvent) {
        match event {
            HubEvent::ListCreated(list)
            | HubEvent::ListUpdated(list)
            | HubEvent::ListShareUpdated(list) => self.upsert_list(list),
            HubEvent::ListShared { list, tasks } => {
                self.upsert_list(list);
                for task in tasks {
                    self.upsert_task(task);
                }
            }
            HubEvent::ListDeleted { list_id } => self.remove_list(*list_id),
            HubEvent::ListUnshared { list_id } => self.forget_list(*list_id),
            HubEvent::TaskCreated(task)
            | HubEvent::TaskUpdated(task)
            | HubEvent::TaskShared(task)
            | HubEvent::TaskShareUpdated(task) => self.upsert_task(task),
            HubEvent::TaskDeleted { task_id, .. } => {
                self.tasks.remove(task_id);
            }
            HubEvent::TaskUnshared { task_id } => self.forget_task(*task_id),
        }
    }

    fn apply_payload(&mut self, payload: &Payload) {
        match payload {
            Payload::List(list) => self.upsert_list(list),
            Payload::Task(task) => self.upsert_task(task),
            Payload::Snapshot(snapshot) => {
                *self = self.apply(&CacheUpdate::Loaded(snapshot.clone()));
            }
            Payload::ListDeleted(list_id) => self.remove_list(*list_id),
            Payload::TaskDeleted { task_id, .. } => {
                self.tasks.remove(task_id);
            }
            Payload::LeftList(list_id) => self.forget_list(*list_id),
            Payload::LeftTask(task_id) => self.forget_task(*task_id),
            Payload::Notifications(_) => {}
        }
    }

    fn upsert_list(&mut self, list: &List) {
        self.lists.insert(list.id, list.clone());
    }

    fn upsert_task(&mut self, task: &Task) {
        self.tasks.insert(task.id, task.clone());
    }

    /// The list is gone for everyone.
    fn remove_list(&mut self, list_id: ListId) {
        self.lists.remove(&list_id);
        self.tasks.retain(|_, t| t.list_id != list_id);
    }

    /// The list is gone for this user; keep tasks still shared directly.
    fn forget_list(&mut self, list_id: ListId) {
        self.lists.remove(&list_id);
        let user = &self.user;
        self.tasks
            .retain(|_, t| t.list_id != list_id || t.grant_for(user).is_some());
    }

    /// The direct grant is gone; keep the task if its list is still visible.
    fn forget_task(&mut self, task_id: TaskId) {
        let keep = self
            .tasks
            .get(&task_id)
            .is_some_and(|t| self.lists.contains_key(&t.list_id));
        if !keep {
            self.tasks.remove(&task_id);
        }
    }
}
