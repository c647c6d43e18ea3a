//! Reminder scanner.
//!
//! Pull-triggered: nothing runs on a timer. A caller asks for the tenant's
//! open tasks due within a horizon, or asks for those tasks to be pushed to
//! each assignee's personal group as `ReceiveReminder`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use taskhub_proto::hub::{ReminderNotice, ServerFrame};
use taskhub_proto::task::{Task, TenantId};

use crate::dispatch::Dispatcher;
use crate::error::HubError;
use crate::groups::GroupId;
use crate::store::{TaskFilter, TaskStore};

/// Outcome of a reminder send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSummary {
    /// Due tasks found.
    pub tasks: usize,
    /// Per-user reminder events enqueued.
    pub notifications: usize,
}

/// Finds due tasks and notifies their assignees.
pub struct ReminderScanner<S> {
    store: Arc<S>,
    dispatcher: Dispatcher,
}

impl<S> Clone for ReminderScanner<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S: TaskStore> ReminderScanner<S> {
    /// Creates a scanner over a store and a dispatcher.
    #[must_use]
    pub const fn new(store: Arc<S>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Tenant tasks not yet done with `dueDate <= now + horizon`, soonest
    /// first. Overdue tasks are included.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] on backend failure.
    pub async fn find_due(
        &self,
        tenant_id: &TenantId,
        horizon: Duration,
    ) -> Result<Vec<Task>, HubError> {
        let cutoff = Utc::now()
            .checked_add_signed(horizon)
            .ok_or_else(|| HubError::validation("hours", "horizon is too large"))?;
        let mut due = self
            .store
            .find(TaskFilter::tenant(tenant_id.clone()).open_due_before(cutoff))
            .await?;
        due.sort_by_key(|task| (task.due_date, task.id));
        Ok(due)
    }

    /// Sends `ReceiveReminder` to the personal group of every assignee of
    /// every due task.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] on backend failure.
    pub async fn send_reminders(
        &self,
        tenant_id: &TenantId,
        horizon: Duration,
    ) -> Result<ReminderSummary, HubError> {
        let due = self.find_due(tenant_id, horizon).await?;
        let mut summary = ReminderSummary {
            tasks: due.len(),
            notifications: 0,
        };
        for task in &due {
            let frame = ServerFrame::ReceiveReminder(ReminderNotice {
                task_id: task.id,
                title: task.title.clone(),
                due_date: task.due_date,
                criticality: task.criticality,
            });
            for user in &task.assigned_users {
                self.dispatcher.dispatch(&GroupId::from(user), &frame);
                summary.notifications += 1;
            }
        }
        tracing::info!(
            tenant = %tenant_id,
            tasks = summary.tasks,
            notifications = summary.notifications,
            "reminders sent"
        );
        Ok(summary)
    }
}
