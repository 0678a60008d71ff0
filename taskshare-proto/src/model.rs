//! Entity model: lists, tasks, their share grants, and mutation inputs.
//!
//! Entities are always exchanged fully hydrated with their share rows so a
//! receiver can project access without another round trip.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{CallerGrants, Permission};
use crate::ids::{ListId, TaskId, Timestamp, UserId};

/// Maximum allowed list or task name length in characters.
pub const MAX_NAME_LENGTH: usize = 256;

/// Progress of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Urgency of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Whenever.
    Low,
    /// Normal.
    #[default]
    Medium,
    /// Soon.
    High,
    /// Now.
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A grant of access on a whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListShare {
    /// The shared list.
    pub list_id: ListId,
    /// The grantee.
    pub user_id: UserId,
    /// Level conferred.
    pub permission: Permission,
    /// When the grant was created.
    pub created_at: Timestamp,
}

/// A grant of access on a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskShare {
    /// The shared task.
    pub task_id: TaskId,
    /// The grantee.
    pub user_id: UserId,
    /// Level conferred.
    pub permission: Permission,
    /// When the grant was created.
    pub created_at: Timestamp,
}

/// A collection of tasks owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    /// Unique list identifier.
    pub id: ListId,
    /// Display name.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// The owner. Immutable after creation and never present in `shares`.
    pub owner_id: UserId,
    /// Grants on this list.
    pub shares: Vec<ListShare>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl List {
    /// The level granted to `user` on this list, if any.
    #[must_use]
    pub fn grant_for(&self, user: &UserId) -> Option<Permission> {
        self.shares
            .iter()
            .find(|s| &s.user_id == user)
            .map(|s| s.permission)
    }
}

/// A work item inside a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// The list this task belongs to.
    pub list_id: ListId,
    /// Owner of the parent list; tasks have no owner of their own.
    pub owner_id: UserId,
    /// Display name.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Progress.
    pub status: TaskStatus,
    /// Urgency.
    pub priority: Priority,
    /// Optional due date.
    pub due_date: Option<Timestamp>,
    /// Starred by the user.
    pub favorite: bool,
    /// Whether `status` is [`TaskStatus::Completed`].
    pub completed: bool,
    /// When the task was last completed; cleared when it is reopened.
    pub completed_at: Option<Timestamp>,
    /// Grants on this task.
    pub shares: Vec<TaskShare>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl Task {
    /// The level granted to `user` on this task, if any.
    #[must_use]
    pub fn grant_for(&self, user: &UserId) -> Option<Permission> {
        self.shares
            .iter()
            .find(|s| &s.user_id == user)
            .map(|s| s.permission)
    }

    /// Sets the status, keeping `completed` and `completed_at` in step.
    pub fn set_status(&mut self, status: TaskStatus, now: Timestamp) {
        let was_completed = self.status == TaskStatus::Completed;
        self.status = status;
        match (was_completed, status == TaskStatus::Completed) {
            (false, true) => {
                self.completed = true;
                self.completed_at = Some(now);
            }
            (true, false) => {
                self.completed = false;
                self.completed_at = None;
            }
            _ => {}
        }
    }
}

/// Kind of an informational notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Generated by the system.
    System,
    /// Something was shared with the user.
    Shared,
    /// Something expired.
    Expired,
}

/// Informational record written as a side effect of sharing.
///
/// Notifications never take part in access control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier.
    pub id: Uuid,
    /// Recipient.
    pub user_id: UserId,
    /// Kind of notification.
    pub kind: NotificationKind,
    /// Human-readable text.
    pub message: String,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Notification {
    /// Builds a `Shared` notification for `user_id`.
    #[must_use]
    pub fn shared(user_id: UserId, message: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind: NotificationKind::Shared,
            message,
            created_at: Timestamp::now(),
        }
    }
}

/// Input for creating a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewList {
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Initial status.
    pub status: TaskStatus,
    /// Initial priority.
    pub priority: Priority,
    /// Optional due date.
    pub due_date: Option<Timestamp>,
    /// Initial favorite flag.
    pub favorite: bool,
}

/// Partial update to a list. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPatch {
    /// New name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
}

impl ListPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }

    /// Applies the patch to `list` and bumps `updated_at`.
    pub fn apply(&self, list: &mut List, now: Timestamp) {
        if let Some(name) = &self.name {
            list.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            list.description.clone_from(description);
        }
        list.updated_at = now;
    }
}

/// Partial update to a task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New due date; `Some(None)` clears it.
    pub due_date: Option<Option<Timestamp>>,
    /// New favorite flag.
    pub favorite: Option<bool>,
}

impl TaskPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.favorite.is_none()
    }

    /// Applies the patch to `task` and bumps `updated_at`.
    pub fn apply(&self, task: &mut Task, now: Timestamp) {
        if let Some(name) = &self.name {
            task.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.set_status(status, now);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(favorite) = self.favorite {
            task.favorite = favorite;
        }
        task.updated_at = now;
    }
}

/// Everything a user can see, as returned by an initial fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Lists the user owns or holds a list grant on.
    pub lists: Vec<List>,
    /// Tasks of those lists plus tasks shared with the user directly.
    pub tasks: Vec<Task>,
}

/// Error returned when an entity name fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Name is empty or whitespace.
    #[error("name cannot be empty")]
    EmptyName,
    /// Name exceeds [`MAX_NAME_LENGTH`].
    #[error("name too long ({len} characters, max {max})")]
    NameTooLong {
        /// Actual length in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Checks a list or task name.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyName`] if the name is blank, or
/// [`ValidationError::NameTooLong`] if it exceeds [`MAX_NAME_LENGTH`].
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let len = name.chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(ValidationError::NameTooLong {
            len,
            max: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

/// Builds the caller's grants for `task`, given its parent list if known.
#[must_use]
pub fn caller_grants(user: &UserId, list: Option<&List>, task: &Task) -> CallerGrants {
    CallerGrants {
        list: list.and_then(|l| l.grant_for(user)),
        task: task.grant_for(user),
    }
}
