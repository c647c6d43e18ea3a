//! Activity recorder.
//!
//! Each successful mutation appends exactly one [`ActivityEntry`] to the
//! task it changed. Entries are never edited or removed.

use chrono::{DateTime, Utc};
use taskhub_proto::task::{ActivityEntry, ActivityId, ActivityType, Task, TaskStatus, UserId};

use crate::identity::{Actor, PUBLIC_USER_ID, PUBLIC_USERNAME};

/// Who performed a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    /// Acting user id.
    pub user_id: UserId,
    /// Acting user's display name.
    pub username: String,
}

impl Author {
    /// The anonymous author of changes made through a share link.
    #[must_use]
    pub fn public() -> Self {
        Self {
            user_id: UserId::new(PUBLIC_USER_ID),
            username: PUBLIC_USERNAME.to_string(),
        }
    }
}

impl From<&Actor> for Author {
    fn from(actor: &Actor) -> Self {
        Self {
            user_id: actor.user_id.clone(),
            username: actor.username.clone(),
        }
    }
}

/// The kind-specific part of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Task created.
    Created,
    /// Fields other than status changed.
    Updated(String),
    /// Status moved from one value to another.
    StatusChanged {
        /// Status before the change.
        from: TaskStatus,
        /// Status after the change.
        to: TaskStatus,
    },
    /// A comment was added.
    Commented,
    /// A comment was deleted.
    CommentDeleted,
    /// Task deleted.
    Deleted,
}

impl Change {
    /// `StatusChanged` if the status moved, otherwise `Updated(description)`.
    #[must_use]
    pub fn edit(from: TaskStatus, to: TaskStatus, description: impl Into<String>) -> Self {
        if from == to {
            Self::Updated(description.into())
        } else {
            Self::StatusChanged { from, to }
        }
    }
}

/// Appends one entry to `task`'s log and returns it.
///
/// The timestamp is clamped to the previous entry's so the log stays
/// ordered even if the wall clock steps backwards.
pub fn record(
    task: &mut Task,
    author: &Author,
    change: Change,
    now: DateTime<Utc>,
) -> ActivityEntry {
    let timestamp = task
        .activity_log
        .last()
        .map_or(now, |last| last.timestamp.max(now));
    let (activity_type, description, old_value, new_value) = match change {
        Change::Created => (
            ActivityType::Created,
            format!("Task \"{}\" created", task.title),
            None,
            None,
        ),
        Change::Updated(description) => (ActivityType::Updated, description, None, None),
        Change::StatusChanged { from, to } => (
            ActivityType::StatusChanged,
            format!("Status changed from {from} to {to}"),
            Some(from.to_string()),
            Some(to.to_string()),
        ),
        Change::Commented => (ActivityType::Commented, "Comment added".to_string(), None, None),
        Change::CommentDeleted => (
            ActivityType::CommentDeleted,
            "Comment deleted".to_string(),
            None,
            None,
        ),
        Change::Deleted => (
            ActivityType::Deleted,
            format!("Task \"{}\" deleted", task.title),
            None,
            None,
        ),
    };
    let entry = ActivityEntry {
        id: ActivityId::new(),
        user_id: author.user_id.clone(),
        username: author.username.clone(),
        activity_type,
        description,
        old_value,
        new_value,
        timestamp,
    };
    task.activity_log.push(entry.clone());
    entry
}
