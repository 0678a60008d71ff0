//! Enforcement layer: authorizes every operation, mutates storage, and
//! publishes the resulting events to the hub.
//!
//! Each entry point follows the same sequence:
//! 1. reject a missing caller with [`AccessError::Unauthenticated`];
//! 2. load the target with the caller's own grants ([`AccessError::NotFound`]
//!    if absent);
//! 3. resolve the operation's required level and mode, collapsing every deny
//!    into [`AccessError::Forbidden`];
//! 4. run operation-specific checks (self-grant, duplicate, empty patch,
//!    name validation);
//! 5. mutate storage;
//! 6. publish to the affected rooms.
//!
//! No lock is held between the check and the mutation. Concurrent duplicate
//! grants are caught by the store's uniqueness guarantee and surface as
//! [`AccessError::DuplicateGrant`].

use std::collections::HashSet;
use std::sync::Arc;

use taskshare_proto::access::{
    Decision, Mode, Permission, list_access, resolve_list, resolve_task,
};
use taskshare_proto::ids::{ListId, TaskId, UserId};
use taskshare_proto::model::{
    List, ListPatch, NewList, NewTask, Notification, Snapshot, Task, TaskPatch, ValidationError,
    validate_name,
};
use taskshare_proto::wire::{Failure, FailureKind, HubEvent, Operation, Payload};

use crate::hub::{ConnId, Hub, Room, SubscriptionDiff};
use crate::store::{ListRecord, Store, StoreError, TaskRecord};

/// Reasons an operation is refused or fails.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// No verified caller accompanied the request.
    #[error("authentication required")]
    Unauthenticated,
    /// The target entity does not exist.
    #[error("not found")]
    NotFound,
    /// The caller lacks the required access. Never says whether a weaker
    /// grant exists.
    #[error("forbidden")]
    Forbidden,
    /// The grantee is the owner of the entity.
    #[error("cannot share with the owner")]
    SelfGrant,
    /// The grantee already holds a grant on the entity.
    #[error("grant already exists")]
    DuplicateGrant,
    /// The grantee holds no grant on the entity.
    #[error("grant not found")]
    GrantNotFound,
    /// The update sets no fields.
    #[error("no fields to update")]
    NoFieldsToUpdate,
    /// The input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
    /// The store failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl AccessError {
    /// Wire category of this error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthenticated => FailureKind::Unauthenticated,
            Self::NotFound => FailureKind::NotFound,
            Self::Forbidden => FailureKind::Forbidden,
            Self::SelfGrant => FailureKind::SelfGrant,
            Self::DuplicateGrant => FailureKind::DuplicateGrant,
            Self::GrantNotFound => FailureKind::GrantNotFound,
            Self::NoFieldsToUpdate => FailureKind::NoFieldsToUpdate,
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::Storage(_) => FailureKind::Storage,
        }
    }

    /// Converts to the failure sent over the wire.
    #[must_use]
    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Maps a store `RowNotFound` to `missing`, anything else to `Storage`.
fn missing_as(missing: AccessError) -> impl FnOnce(StoreError) -> AccessError {
    move |err| match err {
        StoreError::RowNotFound => missing,
        other => AccessError::Storage(other),
    }
}

/// Result of a revoke request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unshared<T> {
    /// Another user's grant was removed; carries the updated entity.
    Revoked(T),
    /// The caller removed (or had already removed) their own grant.
    Left,
}

fn authenticated(caller: Option<&UserId>) -> Result<&UserId, AccessError> {
    caller.ok_or(AccessError::Unauthenticated)
}

fn enforce(decision: Decision, caller: &UserId, op: &'static str) -> Result<(), AccessError> {
    if decision.is_allowed() {
        return Ok(());
    }
    tracing::debug!(caller = %caller, op = op, decision = ?decision, "denied");
    Err(AccessError::Forbidden)
}

/// Rooms that hear about changes to `task`: its list room and the user rooms
/// of its direct grantees, optionally skipping one grantee.
fn task_rooms(task: &Task, except: Option<&UserId>) -> Vec<Room> {
    std::iter::once(Room::List(task.list_id))
        .chain(
            task.shares
                .iter()
                .filter(|s| Some(&s.user_id) != except)
                .map(|s| Room::User(s.user_id.clone())),
        )
        .collect()
}

/// Authorizing front door to the store and the hub.
pub struct Service<S: Store> {
    store: Arc<S>,
    hub: Arc<Hub>,
}

impl<S: Store> Clone for Service<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hub: Arc::clone(&self.hub),
        }
    }
}

impl<S: Store> Service<S> {
    /// Creates a service over `store` that publishes to `hub`.
    #[must_use]
    pub const fn new(store: Arc<S>, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    /// The hub this service publishes to.
    #[must_use]
    pub const fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs a wire [`Operation`] on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Returns the [`AccessError`] of the underlying operation.
    pub async fn execute(
        &self,
        caller: Option<&UserId>,
        op: Operation,
    ) -> Result<Payload, AccessError> {
        match op {
            Operation::Snapshot => self.snapshot(caller).map(Payload::Snapshot),
            Operation::Notifications => self.notifications(caller).map(Payload::Notifications),
            Operation::GetList { list_id } => self.get_list(caller, list_id).map(Payload::List),
            Operation::GetTask { task_id } => self.get_task(caller, task_id).map(Payload::Task),
            Operation::CreateList(input) => {
                self.create_list(caller, input).await.map(Payload::List)
            }
            Operation::UpdateList { list_id, patch } => self
                .update_list(caller, list_id, patch)
                .await
                .map(Payload::List),
            Operation::DeleteList { list_id } => {
                self.delete_list(caller, list_id).await?;
                Ok(Payload::ListDeleted(list_id))
            }
            Operation::CreateTask { list_id, task } => self
                .create_task(caller, list_id, task)
                .await
                .map(Payload::Task),
            Operation::UpdateTask { task_id, patch } => self
                .update_task(caller, task_id, patch)
                .await
                .map(Payload::Task),
            Operation::DeleteTask { task_id } => {
                let list_id = self.delete_task(caller, task_id).await?;
                Ok(Payload::TaskDeleted { list_id, task_id })
            }
            Operation::ShareList {
                list_id,
                user_id,
                permission,
            } => self
                .share_list(caller, list_id, &user_id, permission.unwrap_or_default())
                .await
                .map(Payload::List),
            Operation::UpdateListShare {
                list_id,
                user_id,
                permission,
            } => self
                .update_list_share(caller, list_id, &user_id, permission)
                .await
                .map(Payload::List),
            Operation::UnshareList { list_id, user_id } => {
                match self.unshare_list(caller, list_id, &user_id).await? {
                    Unshared::Revoked(list) => Ok(Payload::List(list)),
                    Unshared::Left => Ok(Payload::LeftList(list_id)),
                }
            }
            Operation::ShareTask {
                task_id,
                user_id,
                permission,
            } => self
                .share_task(caller, task_id, &user_id, permission.unwrap_or_default())
                .await
                .map(Payload::Task),
            Operation::UpdateTaskShare {
                task_id,
                user_id,
                permission,
            } => self
                .update_task_share(caller, task_id, &user_id, permission)
                .await
                .map(Payload::Task),
            Operation::UnshareTask { task_id, user_id } => {
                match self.unshare_task(caller, task_id, &user_id).await? {
                    Unshared::Revoked(task) => Ok(Payload::Task(task)),
                    Unshared::Left => Ok(Payload::LeftTask(task_id)),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Everything `caller` can see: owned and list-shared lists with all
    /// their tasks, plus tasks shared with the caller directly.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Unauthenticated`] or [`AccessError::Storage`].
    pub fn snapshot(&self, caller: Option<&UserId>) -> Result<Snapshot, AccessError> {
        let caller = authenticated(caller)?;
        let lists = self.store.lists_for(caller)?;
        let mut tasks = Vec::new();
        for list in &lists {
            tasks.extend(self.store.list_tasks(list.id)?);
        }
        let seen: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        tasks.extend(
            self.store
                .tasks_shared_with(caller)?
                .into_iter()
                .filter(|t| !seen.contains(&t.id)),
        );
        Ok(Snapshot { lists, tasks })
    }

    /// The caller's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Unauthenticated`] or [`AccessError::Storage`].
    pub fn notifications(&self, caller: Option<&UserId>) -> Result<Vec<Notification>, AccessError> {
        let caller = authenticated(caller)?;
        Ok(self.store.notifications_for(caller)?)
    }

    /// Fetches one list. Requires VIEW.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden` or `Storage`.
    pub fn get_list(&self, caller: Option<&UserId>, list_id: ListId) -> Result<List, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        authorize_list(caller, &record, Permission::View, "get_list")?;
        Ok(record.list)
    }

    /// Fetches one task. Requires VIEW, lenient.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden` or `Storage`.
    pub fn get_task(&self, caller: Option<&UserId>, task_id: TaskId) -> Result<Task, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_task(task_id, caller)?;
        authorize_task(caller, &record, Permission::View, Mode::Lenient, "get_task")?;
        Ok(record.task)
    }

    /// Filters `list_ids` down to the lists `caller` can currently view.
    ///
    /// Used by the socket handler before announcing subscriptions to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Storage`] on store failure.
    pub fn visible_lists(
        &self,
        caller: &UserId,
        list_ids: &[ListId],
    ) -> Result<Vec<ListId>, AccessError> {
        let mut visible = Vec::with_capacity(list_ids.len());
        for id in list_ids {
            if let Some(record) = self.store.find_list(*id, caller)?
                && list_access(caller, &record.list.owner_id, record.grant).is_some()
            {
                visible.push(*id);
            }
        }
        Ok(visible)
    }

    /// Moves connection `conn` of `caller` into the rooms of the announced
    /// lists the caller can view, leaving every other list room.
    ///
    /// Access is checked again after joining. A grant revoked between the
    /// first check and the join has already run its eviction, so any list
    /// that no longer passes is left here and dropped from `joined`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Storage`] on store failure. Memberships are
    /// unchanged when the first check fails.
    pub async fn subscribe(
        &self,
        conn: ConnId,
        caller: &UserId,
        list_ids: &[ListId],
    ) -> Result<SubscriptionDiff, AccessError> {
        let visible = self.visible_lists(caller, list_ids)?;
        if visible.len() < list_ids.len() {
            tracing::debug!(
                conn = conn,
                requested = list_ids.len(),
                visible = visible.len(),
                "dropped inaccessible lists from subscription"
            );
        }
        let Some(mut diff) = self.hub.subscribe_lists(conn, visible).await else {
            return Ok(SubscriptionDiff::default());
        };
        if diff.joined.is_empty() {
            return Ok(diff);
        }

        let still_visible: HashSet<ListId> = match self.visible_lists(caller, &diff.joined) {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                self.hub.leave_lists(conn, &diff.joined).await;
                return Err(err);
            }
        };
        let revoked: Vec<ListId> = diff
            .joined
            .iter()
            .copied()
            .filter(|id| !still_visible.contains(id))
            .collect();
        if !revoked.is_empty() {
            tracing::info!(
                conn = conn,
                user = %caller,
                revoked = revoked.len(),
                "access revoked during subscription"
            );
            self.hub.leave_lists(conn, &revoked).await;
            diff.joined.retain(|id| still_visible.contains(id));
        }
        Ok(diff)
    }

    // -----------------------------------------------------------------------
    // Lists
    // -----------------------------------------------------------------------

    /// Creates a list owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `InvalidInput` or `Storage`.
    pub async fn create_list(
        &self,
        caller: Option<&UserId>,
        input: NewList,
    ) -> Result<List, AccessError> {
        let caller = authenticated(caller)?;
        validate_name(&input.name)?;
        let list = self.store.create_list(caller, &input)?;
        tracing::info!(owner = %caller, list_id = %list.id, "list created");
        self.hub
            .publish(Room::User(caller.clone()), HubEvent::ListCreated(list.clone()))
            .await;
        Ok(list)
    }

    /// Changes list fields. Requires EDIT.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `NoFieldsToUpdate`,
    /// `InvalidInput` or `Storage`.
    pub async fn update_list(
        &self,
        caller: Option<&UserId>,
        list_id: ListId,
        patch: ListPatch,
    ) -> Result<List, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        authorize_list(caller, &record, Permission::Edit, "update_list")?;
        if patch.is_empty() {
            return Err(AccessError::NoFieldsToUpdate);
        }
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        let list = self
            .store
            .update_list(list_id, &patch)
            .map_err(missing_as(AccessError::NotFound))?;
        self.hub
            .publish(Room::List(list_id), HubEvent::ListUpdated(list.clone()))
            .await;
        Ok(list)
    }

    /// Deletes a list with its tasks and grants. Requires ADMIN.
    ///
    /// Everyone who could see the list or one of its tasks is told, and the
    /// list room is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden` or `Storage`.
    pub async fn delete_list(
        &self,
        caller: Option<&UserId>,
        list_id: ListId,
    ) -> Result<(), AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        authorize_list(caller, &record, Permission::Admin, "delete_list")?;

        let tasks = self.store.list_tasks(list_id)?;
        self.store
            .delete_list(list_id)
            .map_err(missing_as(AccessError::NotFound))?;
        tracing::info!(caller = %caller, list_id = %list_id, tasks = tasks.len(), "list deleted");

        let mut rooms = vec![
            Room::List(list_id),
            Room::User(record.list.owner_id.clone()),
        ];
        rooms.extend(
            record
                .list
                .shares
                .iter()
                .map(|s| Room::User(s.user_id.clone())),
        );
        rooms.extend(
            tasks
                .iter()
                .flat_map(|t| &t.shares)
                .map(|s| Room::User(s.user_id.clone())),
        );
        self.hub
            .publish_to(&rooms, HubEvent::ListDeleted { list_id })
            .await;
        self.hub.close_list_room(list_id).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Creates a task under a list. Requires EDIT on the list.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `InvalidInput` or
    /// `Storage`.
    pub async fn create_task(
        &self,
        caller: Option<&UserId>,
        list_id: ListId,
        input: NewTask,
    ) -> Result<Task, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        authorize_list(caller, &record, Permission::Edit, "create_task")?;
        validate_name(&input.name)?;
        let task = self
            .store
            .create_task(list_id, &input)
            .map_err(missing_as(AccessError::NotFound))?;
        tracing::debug!(caller = %caller, list_id = %list_id, task_id = %task.id, "task created");
        self.hub
            .publish(Room::List(list_id), HubEvent::TaskCreated(task.clone()))
            .await;
        Ok(task)
    }

    /// Changes task fields. Requires EDIT, lenient.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `NoFieldsToUpdate`,
    /// `InvalidInput` or `Storage`.
    pub async fn update_task(
        &self,
        caller: Option<&UserId>,
        task_id: TaskId,
        patch: TaskPatch,
    ) -> Result<Task, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_task(task_id, caller)?;
        authorize_task(caller, &record, Permission::Edit, Mode::Lenient, "update_task")?;
        if patch.is_empty() {
            return Err(AccessError::NoFieldsToUpdate);
        }
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        let task = self
            .store
            .update_task(task_id, &patch)
            .map_err(missing_as(AccessError::NotFound))?;
        self.hub
            .publish_to(&task_rooms(&task, None), HubEvent::TaskUpdated(task.clone()))
            .await;
        Ok(task)
    }

    /// Deletes a task. Requires ADMIN, strict. Returns the parent list id.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden` or `Storage`.
    pub async fn delete_task(
        &self,
        caller: Option<&UserId>,
        task_id: TaskId,
    ) -> Result<ListId, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_task(task_id, caller)?;
        authorize_task(caller, &record, Permission::Admin, Mode::Strict, "delete_task")?;
        self.store
            .delete_task(task_id)
            .map_err(missing_as(AccessError::NotFound))?;
        let list_id = record.task.list_id;
        tracing::debug!(caller = %caller, task_id = %task_id, "task deleted");
        self.hub
            .publish_to(
                &task_rooms(&record.task, None),
                HubEvent::TaskDeleted { list_id, task_id },
            )
            .await;
        Ok(list_id)
    }

    // -----------------------------------------------------------------------
    // List grants
    // -----------------------------------------------------------------------

    /// Grants `grantee` access to a list. Requires ADMIN.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `SelfGrant`,
    /// `DuplicateGrant` or `Storage`.
    pub async fn share_list(
        &self,
        caller: Option<&UserId>,
        list_id: ListId,
        grantee: &UserId,
        permission: Permission,
    ) -> Result<List, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        authorize_list(caller, &record, Permission::Admin, "share_list")?;
        if grantee == &record.list.owner_id {
            return Err(AccessError::SelfGrant);
        }
        if record.list.grant_for(grantee).is_some() {
            return Err(AccessError::DuplicateGrant);
        }
        let list = self
            .store
            .create_list_share(list_id, grantee, permission)
            .map_err(|err| match err {
                StoreError::UniqueViolation => AccessError::DuplicateGrant,
                StoreError::RowNotFound => AccessError::NotFound,
                other => AccessError::Storage(other),
            })?;
        tracing::info!(
            caller = %caller,
            list_id = %list_id,
            grantee = %grantee,
            permission = %permission,
            "list shared"
        );
        self.notify_shared(
            grantee,
            format!("{caller} shared the list \"{}\" with you", list.name),
        );

        let tasks = self.store.list_tasks(list_id)?;
        self.hub
            .publish(
                Room::User(grantee.clone()),
                HubEvent::ListShared {
                    list: list.clone(),
                    tasks,
                },
            )
            .await;
        self.hub
            .publish(Room::List(list_id), HubEvent::ListUpdated(list.clone()))
            .await;
        Ok(list)
    }

    /// Changes the level of an existing list grant. Requires ADMIN.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `GrantNotFound` or
    /// `Storage`.
    pub async fn update_list_share(
        &self,
        caller: Option<&UserId>,
        list_id: ListId,
        grantee: &UserId,
        permission: Permission,
    ) -> Result<List, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        authorize_list(caller, &record, Permission::Admin, "update_list_share")?;
        let list = self
            .store
            .update_list_share(list_id, grantee, permission)
            .map_err(missing_as(AccessError::GrantNotFound))?;
        tracing::info!(
            caller = %caller,
            list_id = %list_id,
            grantee = %grantee,
            permission = %permission,
            "list share updated"
        );
        self.hub
            .publish(
                Room::User(grantee.clone()),
                HubEvent::ListShareUpdated(list.clone()),
            )
            .await;
        self.hub
            .publish(Room::List(list_id), HubEvent::ListUpdated(list.clone()))
            .await;
        Ok(list)
    }

    /// Revokes a list grant.
    ///
    /// When `grantee` is the caller (and not the owner) this is a "leave":
    /// no level is required, and an already-missing grant still succeeds.
    /// Otherwise ADMIN is required.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `GrantNotFound` or
    /// `Storage`.
    pub async fn unshare_list(
        &self,
        caller: Option<&UserId>,
        list_id: ListId,
        grantee: &UserId,
    ) -> Result<Unshared<List>, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_list(list_id, caller)?;
        let leaving = grantee == caller && caller != &record.list.owner_id;

        if leaving {
            match self.store.delete_list_share(list_id, grantee) {
                Ok(list) => {
                    tracing::info!(user = %caller, list_id = %list_id, "left list");
                    self.announce_list_unshared(grantee, list).await;
                }
                Err(StoreError::RowNotFound) => {
                    tracing::debug!(user = %caller, list_id = %list_id, "already left list");
                }
                Err(other) => return Err(AccessError::Storage(other)),
            }
            return Ok(Unshared::Left);
        }

        authorize_list(caller, &record, Permission::Admin, "unshare_list")?;
        let list = self
            .store
            .delete_list_share(list_id, grantee)
            .map_err(missing_as(AccessError::GrantNotFound))?;
        tracing::info!(
            caller = %caller,
            list_id = %list_id,
            grantee = %grantee,
            "list unshared"
        );
        self.announce_list_unshared(grantee, list.clone()).await;
        Ok(Unshared::Revoked(list))
    }

    /// Records a share notification. The grant already stands, so a failed
    /// write is logged and otherwise ignored.
    fn notify_shared(&self, grantee: &UserId, message: String) {
        if let Err(err) = self
            .store
            .push_notification(Notification::shared(grantee.clone(), message))
        {
            tracing::warn!(grantee = %grantee, err = %err, "failed to record share notification");
        }
    }

    async fn announce_list_unshared(&self, former: &UserId, list: List) {
        let list_id = list.id;
        self.hub.evict_user(former, list_id).await;
        self.hub
            .publish(
                Room::User(former.clone()),
                HubEvent::ListUnshared { list_id },
            )
            .await;
        self.hub
            .publish(Room::List(list_id), HubEvent::ListUpdated(list))
            .await;
    }

    // -----------------------------------------------------------------------
    // Task grants
    // -----------------------------------------------------------------------

    /// Grants `grantee` access to a single task. Requires ADMIN, strict.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `SelfGrant`,
    /// `DuplicateGrant` or `Storage`.
    pub async fn share_task(
        &self,
        caller: Option<&UserId>,
        task_id: TaskId,
        grantee: &UserId,
        permission: Permission,
    ) -> Result<Task, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_task(task_id, caller)?;
        authorize_task(caller, &record, Permission::Admin, Mode::Strict, "share_task")?;
        if grantee == &record.task.owner_id {
            return Err(AccessError::SelfGrant);
        }
        if record.task.grant_for(grantee).is_some() {
            return Err(AccessError::DuplicateGrant);
        }
        let task = self
            .store
            .create_task_share(task_id, grantee, permission)
            .map_err(|err| match err {
                StoreError::UniqueViolation => AccessError::DuplicateGrant,
                StoreError::RowNotFound => AccessError::NotFound,
                other => AccessError::Storage(other),
            })?;
        tracing::info!(
            caller = %caller,
            task_id = %task_id,
            grantee = %grantee,
            permission = %permission,
            "task shared"
        );
        self.notify_shared(
            grantee,
            format!("{caller} shared the task \"{}\" with you", task.name),
        );

        self.hub
            .publish(
                Room::User(grantee.clone()),
                HubEvent::TaskShared(task.clone()),
            )
            .await;
        self.hub
            .publish_to(
                &task_rooms(&task, Some(grantee)),
                HubEvent::TaskUpdated(task.clone()),
            )
            .await;
        Ok(task)
    }

    /// Changes the level of an existing task grant. Requires ADMIN, strict.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `GrantNotFound` or
    /// `Storage`.
    pub async fn update_task_share(
        &self,
        caller: Option<&UserId>,
        task_id: TaskId,
        grantee: &UserId,
        permission: Permission,
    ) -> Result<Task, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_task(task_id, caller)?;
        authorize_task(
            caller,
            &record,
            Permission::Admin,
            Mode::Strict,
            "update_task_share",
        )?;
        let task = self
            .store
            .update_task_share(task_id, grantee, permission)
            .map_err(missing_as(AccessError::GrantNotFound))?;
        tracing::info!(
            caller = %caller,
            task_id = %task_id,
            grantee = %grantee,
            permission = %permission,
            "task share updated"
        );
        self.hub
            .publish(
                Room::User(grantee.clone()),
                HubEvent::TaskShareUpdated(task.clone()),
            )
            .await;
        self.hub
            .publish_to(
                &task_rooms(&task, Some(grantee)),
                HubEvent::TaskUpdated(task.clone()),
            )
            .await;
        Ok(task)
    }

    /// Revokes a task grant.
    ///
    /// Self-revocation follows the same rules as [`Service::unshare_list`];
    /// revoking another user's grant requires ADMIN, strict.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `NotFound`, `Forbidden`, `GrantNotFound` or
    /// `Storage`.
    pub async fn unshare_task(
        &self,
        caller: Option<&UserId>,
        task_id: TaskId,
        grantee: &UserId,
    ) -> Result<Unshared<Task>, AccessError> {
        let caller = authenticated(caller)?;
        let record = self.load_task(task_id, caller)?;
        let leaving = grantee == caller && caller != &record.task.owner_id;

        if leaving {
            match self.store.delete_task_share(task_id, grantee) {
                Ok(task) => {
                    tracing::info!(user = %caller, task_id = %task_id, "left task");
                    self.announce_task_unshared(grantee, task).await;
                }
                Err(StoreError::RowNotFound) => {
                    tracing::debug!(user = %caller, task_id = %task_id, "already left task");
                }
                Err(other) => return Err(AccessError::Storage(other)),
            }
            return Ok(Unshared::Left);
        }

        authorize_task(caller, &record, Permission::Admin, Mode::Strict, "unshare_task")?;
        let task = self
            .store
            .delete_task_share(task_id, grantee)
            .map_err(missing_as(AccessError::GrantNotFound))?;
        tracing::info!(
            caller = %caller,
            task_id = %task_id,
            grantee = %grantee,
            "task unshared"
        );
        self.announce_task_unshared(grantee, task.clone()).await;
        Ok(Unshared::Revoked(task))
    }

    async fn announce_task_unshared(&self, former: &UserId, task: Task) {
        let task_id = task.id;
        self.hub
            .publish(
                Room::User(former.clone()),
                HubEvent::TaskUnshared { task_id },
            )
            .await;
        self.hub
            .publish_to(&task_rooms(&task, None), HubEvent::TaskUpdated(task.clone()))
            .await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn load_list(&self, id: ListId, caller: &UserId) -> Result<ListRecord, AccessError> {
        self.store.find_list(id, caller)?.ok_or(AccessError::NotFound)
    }

    fn load_task(&self, id: TaskId, caller: &UserId) -> Result<TaskRecord, AccessError> {
        self.store.find_task(id, caller)?.ok_or(AccessError::NotFound)
    }
}

fn authorize_list(
    caller: &UserId,
    record: &ListRecord,
    required: Permission,
    op: &'static str,
) -> Result<(), AccessError> {
    enforce(
        resolve_list(caller, &record.list.owner_id, record.grant, required),
        caller,
        op,
    )
}

fn authorize_task(
    caller: &UserId,
    record: &TaskRecord,
    required: Permission,
    mode: Mode,
    op: &'static str,
) -> Result<(), AccessError> {
    enforce(
        resolve_task(caller, &record.task.owner_id, record.grants, required, mode),
        caller,
        op,
    )
}
