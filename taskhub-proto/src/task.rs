//! Task record types shared by the hub server and its clients.
//!
//! A [`Task`] is owned by exactly one tenant for its whole lifetime and
//! carries its own comment thread, an append-only activity log, and the
//! public share sub-record ([`ShareState`]).

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::share::ShareState;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a comment within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(Uuid);

impl CommentId {
    /// Creates a new time-ordered comment identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(Uuid);

impl ActivityId {
    /// Creates a new time-ordered activity identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a tenant organization. Also the name of its broadcast group.
    TenantId
);

string_id!(
    /// Identifier of a user. Also the name of the user's personal broadcast group.
    UserId
);

/// Error returned when a string is not a member of a closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("must be one of: {allowed}")]
pub struct UnknownVariant {
    /// Comma-separated list of accepted values.
    pub allowed: &'static str,
}

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    ToDo,
    /// Actively being worked on.
    InProgress,
    /// Completed.
    Done,
}

impl TaskStatus {
    /// Accepted wire values, in declaration order.
    pub const ALLOWED: &'static str = "ToDo, InProgress, Done";

    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "ToDo",
            Self::InProgress => "InProgress",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ToDo" => Ok(Self::ToDo),
            "InProgress" => Ok(Self::InProgress),
            "Done" => Ok(Self::Done),
            _ => Err(UnknownVariant {
                allowed: Self::ALLOWED,
            }),
        }
    }
}

/// Business criticality of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criticality {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl Criticality {
    /// Accepted wire values, in declaration order.
    pub const ALLOWED: &'static str = "Low, Medium, High";

    /// Returns the wire name of the criticality.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criticality {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Self::Low),
            "Medium" => Ok(Self::Medium),
            "High" => Ok(Self::High),
            _ => Err(UnknownVariant {
                allowed: Self::ALLOWED,
            }),
        }
    }
}

/// A comment on a task. The author's username is captured at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Comment identifier.
    pub id: CommentId,
    /// Author's user id. Only the author may delete the comment.
    pub user_id: UserId,
    /// Author's display name at the time of writing.
    pub username: String,
    /// Comment body.
    pub text: String,
    /// When the comment was written.
    pub created_at: DateTime<Utc>,
}

/// Kind of state change recorded in a task's activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    /// The task was created.
    Created,
    /// Fields other than status changed.
    Updated,
    /// The status changed (takes priority over `Updated`).
    StatusChanged,
    /// A comment was added.
    Commented,
    /// A comment was removed by its author.
    CommentDeleted,
    /// The task was deleted.
    Deleted,
}

/// One immutable audit record attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Entry identifier.
    pub id: ActivityId,
    /// Acting user id.
    pub user_id: UserId,
    /// Acting user's display name.
    pub username: String,
    /// What happened.
    pub activity_type: ActivityType,
    /// Human-readable summary.
    pub description: String,
    /// Previous value (status changes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    /// New value (status changes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    /// When the change was recorded.
    pub timestamp: DateTime<Utc>,
}

/// A shared task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Owning tenant. Never changes after creation.
    pub tenant_id: TenantId,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// When the task is due.
    pub due_date: DateTime<Utc>,
    /// Workflow status.
    pub status: TaskStatus,
    /// Criticality.
    pub criticality: Criticality,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Users assigned to this task.
    #[serde(default)]
    pub assigned_users: BTreeSet<UserId>,
    /// Attached file paths, in attachment order.
    #[serde(default)]
    pub files: Vec<String>,
    /// Creator's username.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Username of the last writer.
    pub updated_by: String,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
    /// Username that first moved the task into `Done`.
    #[serde(default)]
    pub completed_by: Option<String>,
    /// Time of the first transition into `Done`.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Comment thread, oldest first.
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Append-only audit trail, oldest first.
    #[serde(default)]
    pub activity_log: Vec<ActivityEntry>,
    /// Public share sub-record.
    #[serde(flatten)]
    pub share: ShareState,
}

impl Task {
    /// Returns `true` if the task has an active public share token.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.share.is_shared()
    }

    /// Finds a comment by id.
    #[must_use]
    pub fn comment(&self, id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }
}

/// Client-supplied fields of a create or update request.
///
/// Enumerations arrive as strings and are validated by the server so that an
/// unknown value can be reported against its field. Server-stamped fields
/// (audit stamps, comments, activity log, share state) are not accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDraft {
    /// Short title. Required.
    pub title: Option<String>,
    /// Description. Required.
    pub description: Option<String>,
    /// Due date. Required.
    pub due_date: Option<DateTime<Utc>>,
    /// Status name. Required.
    pub status: Option<String>,
    /// Criticality name. Required.
    pub criticality: Option<String>,
    /// Tags.
    pub tags: BTreeSet<String>,
    /// Assigned users.
    pub assigned_users: BTreeSet<UserId>,
    /// Attached file paths.
    pub files: Vec<String>,
}

/// Body of an assign or unassign request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignRequest {
    /// Users to add or remove.
    pub user_ids: Vec<UserId>,
}

/// Body of a file attach request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesRequest {
    /// Storage paths produced by the upload service.
    pub paths: Vec<String>,
}

/// Body of a file detach request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileRemoval {
    /// Path to remove.
    pub path: String,
}

/// Body of an add-comment request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommentDraft {
    /// Comment text.
    pub text: String,
}
