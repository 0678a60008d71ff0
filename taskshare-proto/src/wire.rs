//! Wire protocol between `TaskShare` clients and the hub.
//!
//! Every WebSocket binary frame carries exactly one postcard-encoded
//! [`HubMessage`]. A connection starts with an `Authenticate` handshake, then
//! interleaves requests, list-room subscriptions, and pushed events.

use serde::{Deserialize, Serialize};

use crate::access::Permission;
use crate::ids::{ListId, TaskId, UserId};
use crate::model::{
    List, ListPatch, NewList, NewTask, Notification, Snapshot, Task, TaskPatch,
};

/// Top-level frame exchanged over the hub WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubMessage {
    /// Client presents its bearer token. Must be the first frame sent.
    Authenticate {
        /// Opaque token verified by the hub's authenticator.
        token: String,
    },

    /// Hub confirms the handshake and names the verified user.
    Authenticated {
        /// The identity bound to this connection.
        user_id: UserId,
    },

    /// Client announces the full set of lists it can currently see.
    ///
    /// The hub diffs this against the previous announcement and joins or
    /// leaves list rooms accordingly.
    SubscribeLists {
        /// Client-chosen correlation id echoed in `Subscribed`.
        request_id: u64,
        /// Every accessible list id (not a delta).
        list_ids: Vec<ListId>,
    },

    /// Hub reports how an announcement changed room membership.
    ///
    /// Sent exactly once per `SubscribeLists`; empty when nothing changed or
    /// the announcement could not be processed.
    Subscribed {
        /// The announcement's `request_id`.
        request_id: u64,
        /// Rooms joined by this announcement.
        joined: Vec<ListId>,
        /// Rooms left by this announcement.
        left: Vec<ListId>,
    },

    /// Client asks the hub to perform an operation.
    Request {
        /// Client-chosen correlation id echoed in the response.
        request_id: u64,
        /// The operation.
        op: Operation,
    },

    /// Hub answers a request.
    Response {
        /// Correlation id from the request.
        request_id: u64,
        /// Success payload or typed failure.
        outcome: Outcome,
    },

    /// Hub pushes an entity change to a room member.
    Event(HubEvent),

    /// Hub reports a protocol-level problem.
    Error {
        /// Human-readable description.
        reason: String,
    },
}

/// Operations a client may request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Fetch everything the caller can see.
    Snapshot,
    /// Fetch the caller's notifications, newest first.
    Notifications,
    /// Fetch one list.
    GetList {
        /// Target list.
        list_id: ListId,
    },
    /// Fetch one task.
    GetTask {
        /// Target task.
        task_id: TaskId,
    },
    /// Create a list owned by the caller.
    CreateList(NewList),
    /// Change list fields.
    UpdateList {
        /// Target list.
        list_id: ListId,
        /// Fields to change.
        patch: ListPatch,
    },
    /// Delete a list with all its tasks and grants.
    DeleteList {
        /// Target list.
        list_id: ListId,
    },
    /// Create a task under a list.
    CreateTask {
        /// Parent list.
        list_id: ListId,
        /// Task fields.
        task: NewTask,
    },
    /// Change task fields.
    UpdateTask {
        /// Target task.
        task_id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Delete a task.
    DeleteTask {
        /// Target task.
        task_id: TaskId,
    },
    /// Grant a user access to a list. Level defaults to VIEW.
    ShareList {
        /// Target list.
        list_id: ListId,
        /// Grantee.
        user_id: UserId,
        /// Level to grant.
        permission: Option<Permission>,
    },
    /// Change the level of an existing list grant.
    UpdateListShare {
        /// Target list.
        list_id: ListId,
        /// Grantee.
        user_id: UserId,
        /// New level.
        permission: Permission,
    },
    /// Revoke a list grant, or leave the list when `user_id` is the caller.
    UnshareList {
        /// Target list.
        list_id: ListId,
        /// Grantee.
        user_id: UserId,
    },
    /// Grant a user access to a single task. Level defaults to VIEW.
    ShareTask {
        /// Target task.
        task_id: TaskId,
        /// Grantee.
        user_id: UserId,
        /// Level to grant.
        permission: Option<Permission>,
    },
    /// Change the level of an existing task grant.
    UpdateTaskShare {
        /// Target task.
        task_id: TaskId,
        /// Grantee.
        user_id: UserId,
        /// New level.
        permission: Permission,
    },
    /// Revoke a task grant, or leave the task when `user_id` is the caller.
    UnshareTask {
        /// Target task.
        task_id: TaskId,
        /// Grantee.
        user_id: UserId,
    },
}

impl Operation {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Notifications => "notifications",
            Self::GetList { .. } => "get_list",
            Self::GetTask { .. } => "get_task",
            Self::CreateList(_) => "create_list",
            Self::UpdateList { .. } => "update_list",
            Self::DeleteList { .. } => "delete_list",
            Self::CreateTask { .. } => "create_task",
            Self::UpdateTask { .. } => "update_task",
            Self::DeleteTask { .. } => "delete_task",
            Self::ShareList { .. } => "share_list",
            Self::UpdateListShare { .. } => "update_list_share",
            Self::UnshareList { .. } => "unshare_list",
            Self::ShareTask { .. } => "share_task",
            Self::UpdateTaskShare { .. } => "update_task_share",
            Self::UnshareTask { .. } => "unshare_task",
        }
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// A fully hydrated list.
    List(List),
    /// A fully hydrated task.
    Task(Task),
    /// Everything the caller can see.
    Snapshot(Snapshot),
    /// The caller's notifications.
    Notifications(Vec<Notification>),
    /// A list was deleted.
    ListDeleted(ListId),
    /// A task was deleted.
    TaskDeleted {
        /// Parent list of the deleted task.
        list_id: ListId,
        /// The deleted task.
        task_id: TaskId,
    },
    /// The caller revoked their own list grant.
    LeftList(ListId),
    /// The caller revoked their own task grant.
    LeftTask(TaskId),
}

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No verified caller.
    Unauthenticated,
    /// The entity does not exist.
    NotFound,
    /// The caller lacks the required access.
    Forbidden,
    /// The grantee is the entity's owner.
    SelfGrant,
    /// A grant already exists for the pair.
    DuplicateGrant,
    /// No grant exists for the pair.
    GrantNotFound,
    /// The update changes nothing.
    NoFieldsToUpdate,
    /// The input failed validation.
    InvalidInput,
    /// The storage layer failed.
    Storage,
}

/// Typed failure returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Category.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The operation succeeded.
    Ok(Payload),
    /// The operation failed.
    Err(Failure),
}

impl From<Outcome> for Result<Payload, Failure> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(payload) => Ok(payload),
            Outcome::Err(failure) => Err(failure),
        }
    }
}

/// Entity change pushed to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubEvent {
    /// A list was created (sent to the owner's user room).
    ListCreated(List),
    /// A list's fields or grants changed.
    ListUpdated(List),
    /// A list was deleted.
    ListDeleted {
        /// The deleted list.
        list_id: ListId,
    },
    /// A task was created.
    TaskCreated(Task),
    /// A task's fields or grants changed.
    TaskUpdated(Task),
    /// A task was deleted.
    TaskDeleted {
        /// Parent list.
        list_id: ListId,
        /// The deleted task.
        task_id: TaskId,
    },
    /// The recipient was granted access to a list.
    ListShared {
        /// The list, hydrated with its grants.
        list: List,
        /// Every task of the list.
        tasks: Vec<Task>,
    },
    /// The recipient's list grant changed level.
    ListShareUpdated(List),
    /// The recipient's list grant was revoked.
    ListUnshared {
        /// The list that is no longer accessible.
        list_id: ListId,
    },
    /// The recipient was granted access to a single task.
    TaskShared(Task),
    /// The recipient's task grant changed level.
    TaskShareUpdated(Task),
    /// The recipient's task grant was revoked.
    TaskUnshared {
        /// The task that is no longer directly shared.
        task_id: TaskId,
    },
}

impl HubEvent {
    /// Event name for logs, `entity:action`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListCreated(_) => "list:created",
            Self::ListUpdated(_) => "list:updated",
            Self::ListDeleted { .. } => "list:deleted",
            Self::TaskCreated(_) => "task:created",
            Self::TaskUpdated(_) => "task:updated",
            Self::TaskDeleted { .. } => "task:deleted",
            Self::ListShared { .. } => "list:shared",
            Self::ListShareUpdated(_) => "list:share-updated",
            Self::ListUnshared { .. } => "list:unshared",
            Self::TaskShared(_) => "task:shared",
            Self::TaskShareUpdated(_) => "task:share-updated",
            Self::TaskUnshared { .. } => "task:unshared",
        }
    }
}

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`HubMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns [`WireError::Serialization`] if the message cannot be serialized.
pub fn encode(msg: &HubMessage) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(msg).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Decodes a [`HubMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns [`WireError::Serialization`] if the bytes are not a valid message.
pub fn decode(bytes: &[u8]) -> Result<HubMessage, WireError> {
    postcard::from_bytes(bytes).map_err(|e| WireError::Serialization(e.to_string()))
}
