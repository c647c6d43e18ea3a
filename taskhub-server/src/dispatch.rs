//! Broadcast dispatcher.
//!
//! Turns task mutations into hub frames and fans them out through the
//! [`GroupRegistry`]. Publishing never awaits: frames are encoded once and
//! pushed onto per-connection queues, and delivery failures are logged and
//! dropped. The caller's operation has already succeeded by then.

use std::sync::Arc;

use taskhub_proto::codec;
use taskhub_proto::hub::{CommentAdded, CommentDeleted, ServerFrame, TaskPayload};
use taskhub_proto::share::{PublicTaskView, ShareToken};
use taskhub_proto::task::{Comment, CommentId, Task, TenantId};

use crate::groups::{Delivery, GroupId, GroupRegistry, Outbound};

/// A mutation event addressed to a tenant and, optionally, a share group.
///
/// The tenant id is an explicit field; routing never inspects the payload.
#[derive(Debug, Clone)]
pub struct Broadcast {
    /// Owning tenant; its group always receives `tenant_frame`.
    pub tenant_id: TenantId,
    /// Active share token of the task, if any.
    pub share_token: Option<ShareToken>,
    /// Frame for tenant members.
    pub tenant_frame: ServerFrame,
    /// Frame for share-link viewers. Falls back to `tenant_frame` when `None`.
    pub share_frame: Option<ServerFrame>,
}

impl Broadcast {
    /// `TaskCreated` for the tenant.
    #[must_use]
    pub fn task_created(task: &Task) -> Self {
        Self {
            tenant_id: task.tenant_id.clone(),
            share_token: None,
            tenant_frame: ServerFrame::TaskCreated(Box::new(task.clone())),
            share_frame: None,
        }
    }

    /// `TaskUpdated`: full record for the tenant, public projection for the
    /// share group.
    #[must_use]
    pub fn task_updated(task: &Task) -> Self {
        Self {
            tenant_id: task.tenant_id.clone(),
            share_token: task.share.token().cloned(),
            tenant_frame: ServerFrame::TaskUpdated(TaskPayload::Full(Box::new(task.clone()))),
            share_frame: public_update(task),
        }
    }

    /// `TaskDeleted` for the tenant and, if shared, the share group.
    #[must_use]
    pub fn task_deleted(task: &Task) -> Self {
        Self {
            tenant_id: task.tenant_id.clone(),
            share_token: task.share.token().cloned(),
            tenant_frame: ServerFrame::TaskDeleted(task.id),
            share_frame: None,
        }
    }

    /// `CommentAdded` for the tenant. A shared task's viewers get the public
    /// projection instead, which carries no comment text.
    #[must_use]
    pub fn comment_added(task: &Task, comment: Comment) -> Self {
        Self {
            tenant_id: task.tenant_id.clone(),
            share_token: task.share.token().cloned(),
            tenant_frame: ServerFrame::CommentAdded(CommentAdded {
                task_id: task.id,
                comment,
            }),
            share_frame: public_update(task),
        }
    }

    /// `CommentDeleted` for the tenant, public projection for viewers.
    #[must_use]
    pub fn comment_deleted(task: &Task, comment_id: CommentId) -> Self {
        Self {
            tenant_id: task.tenant_id.clone(),
            share_token: task.share.token().cloned(),
            tenant_frame: ServerFrame::CommentDeleted(CommentDeleted {
                task_id: task.id,
                comment_id,
            }),
            share_frame: public_update(task),
        }
    }

    /// Restricts the broadcast to the tenant group.
    #[must_use]
    pub fn tenant_only(mut self) -> Self {
        self.share_token = None;
        self.share_frame = None;
        self
    }
}

/// Fans frames out to broadcast groups.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<GroupRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given registry.
    #[must_use]
    pub const fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher delivers through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Delivers one frame to every member of `group`.
    ///
    /// Encoding failures are logged and reported as an empty delivery.
    pub fn dispatch(&self, group: &GroupId, frame: &ServerFrame) -> Delivery {
        let Some(encoded) = encode(frame) else {
            return Delivery::default();
        };
        let delivery = self.registry.dispatch(group, &encoded);
        tracing::debug!(
            group = %group,
            event = frame.event_name(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "dispatched"
        );
        delivery
    }

    /// Publishes a mutation to its tenant group, then to its share group.
    pub fn publish(&self, broadcast: &Broadcast) {
        self.dispatch(&GroupId::from(&broadcast.tenant_id), &broadcast.tenant_frame);
        if let Some(token) = &broadcast.share_token {
            let frame = broadcast
                .share_frame
                .as_ref()
                .unwrap_or(&broadcast.tenant_frame);
            self.dispatch(&GroupId::from(token), frame);
        }
    }
}

/// Public `TaskUpdated` for a shared task's viewers; `None` when unshared.
fn public_update(task: &Task) -> Option<ServerFrame> {
    task.share.token().map(|_| {
        ServerFrame::TaskUpdated(TaskPayload::Public(Box::new(PublicTaskView::from(task))))
    })
}

fn encode(frame: &ServerFrame) -> Option<Outbound> {
    match codec::encode_server(frame) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::warn!(event = frame.event_name(), error = %e, "failed to encode frame");
            None
        }
    }
}
