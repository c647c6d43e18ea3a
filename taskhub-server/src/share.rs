//! Public share lifecycle.
//!
//! A task moves `Unshared -> Active` when a token is issued and back to
//! `Unshared` on revoke. `Expired` and `ViewLimitReached` are not stored;
//! they are derived from the share fields each time a token is presented.
//! Resolution is a compare-and-set inside one store modification, so two
//! viewers racing for the last allowed view cannot both win.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use taskhub_proto::hub::ServerFrame;
use taskhub_proto::share::{
    PublicTaskPatch, PublicTaskView, ShareOptions, ShareReceipt, ShareState, ShareToken,
};
use taskhub_proto::task::{Task, TaskId};

use crate::activity::{self, Author, Change};
use crate::dispatch::{Broadcast, Dispatcher};
use crate::error::HubError;
use crate::groups::GroupId;
use crate::identity::{Actor, PUBLIC_USERNAME};
use crate::store::{TaskFilter, TaskStore};
use crate::tasks::{parse_status, sanitize_text, set_status};

/// Attempts at drawing a token that no other task holds.
const TOKEN_ATTEMPTS: usize = 3;

/// Token length in random bytes before hex encoding.
const TOKEN_BYTES: usize = 32;

/// Draws a fresh token from the thread-local CSPRNG.
#[must_use]
pub fn generate_token() -> ShareToken {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    ShareToken::new(hex::encode(bytes))
}

/// Share options after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShareLimits {
    expires_at: Option<DateTime<Utc>>,
    max_views: Option<u32>,
    allow_edit: bool,
}

/// Hours win over days when both are given.
fn resolve_limits(options: &ShareOptions, now: DateTime<Utc>) -> Result<ShareLimits, HubError> {
    let lifetime = match (options.expires_in_hours, options.expires_in_days) {
        (Some(hours), _) => Some(("expiresInHours", hours, Duration::try_hours(hours))),
        (None, Some(days)) => Some(("expiresInDays", days, Duration::try_days(days))),
        (None, None) => None,
    };
    let expires_at = match lifetime {
        None => None,
        Some((field, value, _)) if value <= 0 => {
            return Err(HubError::validation(field, format!("{field} must be positive")));
        }
        Some((field, _, span)) => Some(
            span.and_then(|span| now.checked_add_signed(span))
                .ok_or_else(|| HubError::validation(field, format!("{field} is too large")))?,
        ),
    };
    let max_views = options
        .max_views
        .map(|max| {
            u32::try_from(max)
                .ok()
                .filter(|max| *max >= 1)
                .ok_or_else(|| HubError::validation("maxViews", "maxViews must be at least 1"))
        })
        .transpose()?;
    Ok(ShareLimits {
        expires_at,
        max_views,
        allow_edit: options.allow_edit,
    })
}

/// Looks up the task holding `token`.
async fn find_by_token<S: TaskStore>(store: &S, token: &ShareToken) -> Result<Task, HubError> {
    if token.as_str().is_empty() {
        return Err(HubError::NotFound("share link".to_string()));
    }
    store
        .find(TaskFilter::share_token(token.clone()))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| HubError::NotFound("share link".to_string()))
}

/// Guards against the token having been replaced between lookup and write.
fn ensure_token(task: &Task, token: &ShareToken) -> Result<(), HubError> {
    if task.share.token() == Some(token) {
        Ok(())
    } else {
        Err(HubError::NotFound("share link".to_string()))
    }
}

/// Issues, revokes and resolves public share tokens.
pub struct ShareService<S> {
    store: Arc<S>,
    dispatcher: Dispatcher,
}

impl<S> Clone for ShareService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S: TaskStore> ShareService<S> {
    /// Creates a service over a store and a dispatcher.
    #[must_use]
    pub const fn new(store: Arc<S>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Issues a new token for a tenant task, replacing any existing one.
    ///
    /// The view counter restarts at zero. Viewers of a replaced token
    /// receive `TaskDeleted`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] for bad options,
    /// [`HubError::NotFound`] for a missing or foreign task, or
    /// [`HubError::Conflict`] if no unused token could be drawn.
    pub async fn share(
        &self,
        actor: &Actor,
        id: TaskId,
        options: &ShareOptions,
    ) -> Result<ShareReceipt, HubError> {
        let limits = resolve_limits(options, Utc::now())?;
        let mut attempt = 0;
        let (task, previous) = loop {
            attempt += 1;
            let token = generate_token();
            let result = self
                .store
                .modify(id, |task| {
                    if task.tenant_id != actor.tenant_id {
                        return Err(HubError::NotFound(format!("task {id}")));
                    }
                    let previous = task.share.token().cloned();
                    task.share = ShareState::issue(
                        token,
                        limits.expires_at,
                        limits.max_views,
                        limits.allow_edit,
                    );
                    Ok((task.clone(), previous))
                })
                .await;
            match result {
                Err(HubError::Conflict(_)) if attempt < TOKEN_ATTEMPTS => {
                    tracing::warn!(task_id = %id, attempt, "share token collision, retrying");
                }
                other => break other?,
            }
        };

        tracing::info!(
            task_id = %id,
            reissued = previous.is_some(),
            max_views = ?limits.max_views,
            allow_edit = limits.allow_edit,
            "task shared"
        );
        if let Some(old) = &previous {
            self.dispatcher
                .dispatch(&GroupId::from(old), &ServerFrame::TaskDeleted(id));
        }
        self.dispatcher
            .publish(&Broadcast::task_updated(&task).tenant_only());

        let token = task
            .share
            .token()
            .cloned()
            .ok_or_else(|| HubError::Store("share token was not stored".to_string()))?;
        Ok(ShareReceipt {
            public_share_id: token,
            share_expires_at: task.share.expires_at(),
            share_max_views: task.share.max_views(),
            share_allow_edit: task.share.allow_edit(),
        })
    }

    /// Revokes the task's token. Revoking an unshared task is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for a missing or foreign task.
    pub async fn revoke(&self, actor: &Actor, id: TaskId) -> Result<ShareState, HubError> {
        let (task, previous) = self
            .store
            .modify(id, |task| {
                if task.tenant_id != actor.tenant_id {
                    return Err(HubError::NotFound(format!("task {id}")));
                }
                let previous = task.share.token().cloned();
                task.share = ShareState::default();
                Ok((task.clone(), previous))
            })
            .await?;

        if let Some(old) = previous {
            tracing::info!(task_id = %id, "share revoked");
            self.dispatcher
                .dispatch(&GroupId::from(&old), &ServerFrame::TaskDeleted(id));
            self.dispatcher
                .publish(&Broadcast::task_updated(&task).tenant_only());
        }
        Ok(task.share)
    }

    /// Resolves a token to the public projection and counts one view.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`], [`HubError::Expired`] or
    /// [`HubError::ViewLimitReached`]. A denied resolution never touches the
    /// view counter.
    pub async fn resolve(&self, token: &ShareToken) -> Result<PublicTaskView, HubError> {
        let task = find_by_token(self.store.as_ref(), token).await?;
        let view = self
            .store
            .modify(task.id, |task| {
                ensure_token(task, token)?;
                task.share.check_access(Utc::now())?;
                task.share.record_view();
                Ok::<_, HubError>(PublicTaskView::from(&*task))
            })
            .await
            .inspect_err(|e| {
                tracing::debug!(task_id = %task.id, error = %e, "share resolution denied");
            })?;

        tracing::info!(task_id = %view.id, views = view.share_view_count, "share resolved");
        Ok(view)
    }

    /// Applies a public edit. Only `description` and `status` are honored,
    /// and a blank description is ignored. Does not count as a view.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`], [`HubError::Expired`] or
    /// [`HubError::ViewLimitReached`] as for [`Self::resolve`], then
    /// [`HubError::Forbidden`] if editing is disabled, then
    /// [`HubError::ValidationFailed`] for an unknown status.
    pub async fn update_via_token(
        &self,
        token: &ShareToken,
        patch: PublicTaskPatch,
    ) -> Result<PublicTaskView, HubError> {
        let task = find_by_token(self.store.as_ref(), token).await?;
        let task = self
            .store
            .modify(task.id, |task| {
                ensure_token(task, token)?;
                task.share.check_access(Utc::now())?;
                if !task.share.allow_edit() {
                    return Err(HubError::Forbidden(
                        "editing is not allowed through this link".to_string(),
                    ));
                }
                let status = patch
                    .status
                    .as_deref()
                    .map(|raw| parse_status("status", raw))
                    .transpose()?
                    .unwrap_or(task.status);

                let now = Utc::now();
                let change = Change::edit(task.status, status, "Task updated via public link");
                if let Some(description) = patch.description.as_deref().map(sanitize_text)
                    && !description.is_empty()
                {
                    task.description = description;
                }
                set_status(task, status, PUBLIC_USERNAME, now);
                task.updated_by = PUBLIC_USERNAME.to_string();
                task.updated_at = now;
                activity::record(task, &Author::public(), change, now);
                Ok(task.clone())
            })
            .await?;

        tracing::info!(task_id = %task.id, status = %task.status, "task updated via share link");
        self.dispatcher.publish(&Broadcast::task_updated(&task));
        Ok(PublicTaskView::from(&task))
    }

    /// Returns `true` if `token` currently grants access. Does not count a
    /// view.
    pub async fn is_live(&self, token: &ShareToken) -> bool {
        find_by_token(self.store.as_ref(), token)
            .await
            .is_ok_and(|task| task.share.check_access(Utc::now()).is_ok())
    }
}
