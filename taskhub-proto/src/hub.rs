//! Hub wire protocol: frames exchanged over the collaboration WebSocket.
//!
//! Frames are JSON text messages tagged by `type`. Server frames carry their
//! body under `payload`, so a client can dispatch on the event name alone:
//!
//! ```json
//! {"type":"TaskDeleted","payload":"01920c4e-..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::share::PublicTaskView;
use crate::task::{Comment, CommentId, Criticality, Task, TaskId};

/// Task body carried by `TaskUpdated`.
///
/// Tenant groups receive the full record; public share groups receive only
/// the public projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskPayload {
    /// Full record, for tenant members.
    Full(Box<Task>),
    /// Public-safe projection, for share-link viewers.
    Public(Box<PublicTaskView>),
}

/// Body of a `CommentAdded` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAdded {
    /// Task the comment belongs to.
    pub task_id: TaskId,
    /// The new comment.
    pub comment: Comment,
}

/// Body of a `CommentDeleted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDeleted {
    /// Task the comment belonged to.
    pub task_id: TaskId,
    /// Id of the removed comment.
    pub comment_id: CommentId,
}

/// Body of a `ReceiveReminder` event, sent to an assignee's personal group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotice {
    /// The task that is coming due.
    pub task_id: TaskId,
    /// Task title.
    pub title: String,
    /// When the task is due.
    pub due_date: DateTime<Utc>,
    /// Task criticality.
    pub criticality: Criticality,
}

/// Frames sent from the hub to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerFrame {
    /// A task was created in the tenant.
    TaskCreated(Box<Task>),
    /// A task changed.
    TaskUpdated(TaskPayload),
    /// A task was deleted, or its public link was revoked or replaced.
    TaskDeleted(TaskId),
    /// A comment was added.
    CommentAdded(CommentAdded),
    /// A comment was removed.
    CommentDeleted(CommentDeleted),
    /// An assigned task is coming due.
    ReceiveReminder(ReminderNotice),
    /// Acknowledges a `JoinGroup` request.
    Joined {
        /// The group that was joined.
        group: String,
    },
    /// Acknowledges a `LeaveGroup` request.
    Left {
        /// The group that was left.
        group: String,
    },
    /// The hub rejected a client frame.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

impl ServerFrame {
    /// The event name clients subscribe to.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => "TaskCreated",
            Self::TaskUpdated(_) => "TaskUpdated",
            Self::TaskDeleted(_) => "TaskDeleted",
            Self::CommentAdded(_) => "CommentAdded",
            Self::CommentDeleted(_) => "CommentDeleted",
            Self::ReceiveReminder(_) => "ReceiveReminder",
            Self::Joined { .. } => "Joined",
            Self::Left { .. } => "Left",
            Self::Error { .. } => "Error",
        }
    }
}

/// Frames sent from a client to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Subscribe this connection to a broadcast group.
    JoinGroup {
        /// Tenant id, user id, or public share token.
        group: String,
    },
    /// Unsubscribe this connection from a broadcast group.
    LeaveGroup {
        /// The group to leave.
        group: String,
    },
}
