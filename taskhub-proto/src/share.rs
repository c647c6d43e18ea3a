//! Public share link types.
//!
//! A task can be exposed to unauthenticated viewers through an opaque
//! [`ShareToken`]. The token and its limits live in [`ShareState`], which is
//! serialized flattened into the task record. An unshared state always has
//! every limit field at its default; the constructors and the deserializer
//! both enforce that.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Criticality, Task, TaskId, TaskStatus};

/// Opaque, unguessable token granting public access to one task.
///
/// The token is also the name of the task's public broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareToken(String);

impl ShareToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShareToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a share token does not currently grant access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareDenial {
    /// The task carries no token (never shared, or revoked).
    NotShared,
    /// `shareExpiresAt` is in the past.
    Expired,
    /// `shareViewCount` has reached `shareMaxViews`.
    ViewLimitReached,
}

/// The public share sub-record of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ShareRecord", rename_all = "camelCase")]
pub struct ShareState {
    public_share_id: Option<ShareToken>,
    share_expires_at: Option<DateTime<Utc>>,
    share_max_views: Option<u32>,
    share_view_count: u32,
    share_allow_edit: bool,
}

/// Raw deserialization shape of [`ShareState`] before normalization.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareRecord {
    #[serde(default)]
    public_share_id: Option<ShareToken>,
    #[serde(default)]
    share_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    share_max_views: Option<u32>,
    #[serde(default)]
    share_view_count: u32,
    #[serde(default)]
    share_allow_edit: bool,
}

impl From<ShareRecord> for ShareState {
    fn from(raw: ShareRecord) -> Self {
        match raw.public_share_id {
            None => Self::default(),
            Some(token) => Self {
                public_share_id: Some(token),
                share_expires_at: raw.share_expires_at,
                share_max_views: raw.share_max_views.map(|max| max.max(1)),
                share_view_count: raw.share_view_count,
                share_allow_edit: raw.share_allow_edit,
            },
        }
    }
}

impl ShareState {
    /// Creates an active share with a fresh view counter.
    ///
    /// A `max_views` of zero is raised to one.
    #[must_use]
    pub fn issue(
        token: ShareToken,
        expires_at: Option<DateTime<Utc>>,
        max_views: Option<u32>,
        allow_edit: bool,
    ) -> Self {
        Self {
            public_share_id: Some(token),
            share_expires_at: expires_at,
            share_max_views: max_views.map(|max| max.max(1)),
            share_view_count: 0,
            share_allow_edit: allow_edit,
        }
    }

    /// Returns `true` if a token is present.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.public_share_id.is_some()
    }

    /// The current token, if shared.
    #[must_use]
    pub const fn token(&self) -> Option<&ShareToken> {
        self.public_share_id.as_ref()
    }

    /// Expiry instant, if any.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.share_expires_at
    }

    /// View cap, if any.
    #[must_use]
    pub const fn max_views(&self) -> Option<u32> {
        self.share_max_views
    }

    /// Number of successful public resolutions since the token was issued.
    #[must_use]
    pub const fn view_count(&self) -> u32 {
        self.share_view_count
    }

    /// Whether public viewers may edit description and status.
    #[must_use]
    pub const fn allow_edit(&self) -> bool {
        self.share_allow_edit
    }

    /// Evaluates the stored limits against `now`.
    ///
    /// Expiry is checked before the view cap.
    ///
    /// # Errors
    ///
    /// Returns the first [`ShareDenial`] that applies.
    pub fn check_access(&self, now: DateTime<Utc>) -> Result<&ShareToken, ShareDenial> {
        let token = self.public_share_id.as_ref().ok_or(ShareDenial::NotShared)?;
        if self.share_expires_at.is_some_and(|at| at <= now) {
            return Err(ShareDenial::Expired);
        }
        if self
            .share_max_views
            .is_some_and(|max| self.share_view_count >= max)
        {
            return Err(ShareDenial::ViewLimitReached);
        }
        Ok(token)
    }

    /// Counts one successful public view. Has no effect on an unshared state.
    pub const fn record_view(&mut self) {
        if self.public_share_id.is_some() {
            self.share_view_count = self.share_view_count.saturating_add(1);
        }
    }
}

/// Options for creating or re-issuing a share link.
///
/// At most one of `expires_in_hours` and `expires_in_days` takes effect;
/// hours win when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShareOptions {
    /// Lifetime of the link in hours.
    pub expires_in_hours: Option<i64>,
    /// Lifetime of the link in days.
    pub expires_in_days: Option<i64>,
    /// Maximum number of successful views.
    pub max_views: Option<i64>,
    /// Whether public viewers may edit description and status.
    pub allow_edit: bool,
}

/// Response returned after sharing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareReceipt {
    /// The new token.
    pub public_share_id: ShareToken,
    /// Expiry instant, if any.
    pub share_expires_at: Option<DateTime<Utc>>,
    /// View cap, if any.
    pub share_max_views: Option<u32>,
    /// Whether public editing is enabled.
    pub share_allow_edit: bool,
}

/// The public-safe projection of a task returned to token holders.
///
/// Tenant id, assignees, comments and the activity log are never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTaskView {
    /// Task id.
    pub id: TaskId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Attached file paths.
    pub files: Vec<String>,
    /// Due date.
    pub due_date: DateTime<Utc>,
    /// Status.
    pub status: TaskStatus,
    /// Tags.
    pub tags: BTreeSet<String>,
    /// Criticality.
    pub criticality: Criticality,
    /// Link expiry, if any.
    pub share_expires_at: Option<DateTime<Utc>>,
    /// Views counted so far.
    pub share_view_count: u32,
    /// View cap, if any.
    pub share_max_views: Option<u32>,
    /// Whether public editing is enabled.
    pub share_allow_edit: bool,
}

impl From<&Task> for PublicTaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            files: task.files.clone(),
            due_date: task.due_date,
            status: task.status,
            tags: task.tags.clone(),
            criticality: task.criticality,
            share_expires_at: task.share.expires_at(),
            share_view_count: task.share.view_count(),
            share_max_views: task.share.max_views(),
            share_allow_edit: task.share.allow_edit(),
        }
    }
}

/// Edit submitted through a public link. Only these two fields are honored;
/// anything else in the request body is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublicTaskPatch {
    /// New description. Blank values are ignored.
    pub description: Option<String>,
    /// New status, validated against [`TaskStatus`].
    pub status: Option<String>,
}
