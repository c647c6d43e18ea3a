//! Task mutation pipeline.
//!
//! Every tenant-scoped operation runs the same steps: authorize the actor
//! against the task's tenant, validate the input, apply it inside one atomic
//! store modification, record one activity entry in the same modification,
//! and publish the resulting event once the write has committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskhub_proto::share::ShareState;
use taskhub_proto::task::{
    Comment, CommentId, Criticality, MAX_TASK_TITLE_LENGTH, Task, TaskDraft, TaskId, TaskStatus,
    UserId,
};

use crate::activity::{self, Author, Change};
use crate::dispatch::{Broadcast, Dispatcher};
use crate::error::HubError;
use crate::identity::Actor;
use crate::store::{TaskFilter, TaskStore};

/// Trims `raw` and escapes the HTML-significant characters `& < > " '`.
#[must_use]
pub fn sanitize_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Moves `task` to `status`, stamping `completedBy/At` on the first
/// transition into `Done` only.
pub(crate) fn set_status(
    task: &mut Task,
    status: TaskStatus,
    username: &str,
    now: DateTime<Utc>,
) {
    let entering_done = status == TaskStatus::Done && task.status != TaskStatus::Done;
    if entering_done && task.completed_at.is_none() {
        task.completed_by = Some(username.to_string());
        task.completed_at = Some(now);
    }
    task.status = status;
}

/// Parses a status name, reporting failures against `field`.
pub(crate) fn parse_status(field: &'static str, raw: &str) -> Result<TaskStatus, HubError> {
    raw.trim()
        .parse::<TaskStatus>()
        .map_err(|e| HubError::validation(field, e.to_string()))
}

/// A draft that passed validation.
#[derive(Debug)]
struct ValidTask {
    title: String,
    description: String,
    due_date: DateTime<Utc>,
    status: TaskStatus,
    criticality: Criticality,
    tags: BTreeSet<String>,
    assigned_users: BTreeSet<UserId>,
    files: Vec<String>,
}

/// Validates fields in a fixed order and reports the first failure.
fn validate(draft: TaskDraft) -> Result<ValidTask, HubError> {
    let title = draft.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(HubError::validation("title", "title is required"));
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(HubError::validation(
            "title",
            format!("title must be at most {MAX_TASK_TITLE_LENGTH} characters"),
        ));
    }
    let description = draft
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if description.is_empty() {
        return Err(HubError::validation("description", "description is required"));
    }
    let due_date = draft
        .due_date
        .ok_or_else(|| HubError::validation("dueDate", "dueDate is required"))?;
    let status = match draft.status.as_deref() {
        Some(raw) => parse_status("status", raw)?,
        None => return Err(HubError::validation("status", "status is required")),
    };
    let criticality = match draft.criticality.as_deref() {
        Some(raw) => raw
            .trim()
            .parse::<Criticality>()
            .map_err(|e| HubError::validation("criticality", e.to_string()))?,
        None => return Err(HubError::validation("criticality", "criticality is required")),
    };
    Ok(ValidTask {
        title: sanitize_text(title),
        description: sanitize_text(description),
        due_date,
        status,
        criticality,
        tags: draft
            .tags
            .iter()
            .map(String::as_str)
            .map(sanitize_text)
            .filter(|t| !t.is_empty())
            .collect(),
        assigned_users: draft.assigned_users,
        files: draft.files,
    })
}

/// Rejects access to a task owned by another tenant. The task is reported
/// as missing so its existence is not disclosed.
fn authorize(actor: &Actor, task: &Task) -> Result<(), HubError> {
    if task.tenant_id == actor.tenant_id {
        Ok(())
    } else {
        Err(HubError::NotFound(format!("task {}", task.id)))
    }
}

fn stamp(task: &mut Task, actor: &Actor, now: DateTime<Utc>) {
    task.updated_by.clone_from(&actor.username);
    task.updated_at = now;
}

/// Tenant-scoped task operations.
pub struct TaskService<S> {
    store: Arc<S>,
    dispatcher: Dispatcher,
}

impl<S> Clone for TaskService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S: TaskStore> TaskService<S> {
    /// Creates a service over a store and a dispatcher.
    #[must_use]
    pub const fn new(store: Arc<S>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// All tasks of the actor's tenant, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] on backend failure.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Task>, HubError> {
        Ok(self
            .store
            .find(TaskFilter::tenant(actor.tenant_id.clone()))
            .await?)
    }

    /// One task of the actor's tenant.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the task is missing or belongs to
    /// another tenant.
    pub async fn get(&self, actor: &Actor, id: TaskId) -> Result<Task, HubError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("task {id}")))?;
        authorize(actor, &task)?;
        Ok(task)
    }

    /// Creates a task in the actor's tenant and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] for the first invalid field.
    pub async fn create(&self, actor: &Actor, draft: TaskDraft) -> Result<Task, HubError> {
        let valid = validate(draft)?;
        let now = Utc::now();
        let mut task = Task {
            id: TaskId::new(),
            tenant_id: actor.tenant_id.clone(),
            title: valid.title,
            description: valid.description,
            due_date: valid.due_date,
            status: TaskStatus::ToDo,
            criticality: valid.criticality,
            tags: valid.tags,
            assigned_users: valid.assigned_users,
            files: valid.files,
            created_by: actor.username.clone(),
            created_at: now,
            updated_by: actor.username.clone(),
            updated_at: now,
            completed_by: None,
            completed_at: None,
            comments: Vec::new(),
            activity_log: Vec::new(),
            share: ShareState::default(),
        };
        set_status(&mut task, valid.status, &actor.username, now);
        activity::record(&mut task, &Author::from(actor), Change::Created, now);
        self.store.insert(task.clone()).await?;

        tracing::info!(task_id = %task.id, tenant = %task.tenant_id, "task created");
        self.dispatcher.publish(&Broadcast::task_created(&task));
        Ok(task)
    }

    /// Replaces the editable fields of a task. Comments, the activity log,
    /// share state and creation stamps are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] or [`HubError::ValidationFailed`].
    /// Nothing is written on error.
    pub async fn update(
        &self,
        actor: &Actor,
        id: TaskId,
        draft: TaskDraft,
    ) -> Result<Task, HubError> {
        let valid = validate(draft)?;
        let task = self
            .store
            .modify(id, |task| {
                authorize(actor, task)?;
                let now = Utc::now();
                let change = Change::edit(task.status, valid.status, "Task updated");
                task.title = valid.title;
                task.description = valid.description;
                task.due_date = valid.due_date;
                task.criticality = valid.criticality;
                task.tags = valid.tags;
                task.assigned_users = valid.assigned_users;
                task.files = valid.files;
                set_status(task, valid.status, &actor.username, now);
                stamp(task, actor, now);
                activity::record(task, &Author::from(actor), change, now);
                Ok::<_, HubError>(task.clone())
            })
            .await?;

        tracing::info!(task_id = %id, status = %task.status, "task updated");
        self.dispatcher.publish(&Broadcast::task_updated(&task));
        Ok(task)
    }

    /// Deletes a task. The returned snapshot ends with the `Deleted` entry.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the task is missing or foreign.
    pub async fn delete(&self, actor: &Actor, id: TaskId) -> Result<Task, HubError> {
        let snapshot = self
            .store
            .remove_with(id, |task| {
                authorize(actor, task)?;
                activity::record(task, &Author::from(actor), Change::Deleted, Utc::now());
                Ok::<_, HubError>(())
            })
            .await?;

        tracing::info!(task_id = %id, shared = snapshot.is_shared(), "task deleted");
        self.dispatcher.publish(&Broadcast::task_deleted(&snapshot));
        Ok(snapshot)
    }

    /// Adds users to the assigned set. Already-assigned ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] on an empty list, or
    /// [`HubError::NotFound`].
    pub async fn assign(
        &self,
        actor: &Actor,
        id: TaskId,
        user_ids: Vec<UserId>,
    ) -> Result<BTreeSet<UserId>, HubError> {
        if user_ids.is_empty() {
            return Err(HubError::validation("userIds", "at least one user id is required"));
        }
        let description = format!("Assigned users: {}", join_ids(&user_ids));
        self.mutate(actor, id, Change::Updated(description), move |task| {
            task.assigned_users.extend(user_ids);
            Ok(())
        })
        .await
        .map(|task| task.assigned_users)
    }

    /// Removes users from the assigned set. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] on an empty list, or
    /// [`HubError::NotFound`].
    pub async fn unassign(
        &self,
        actor: &Actor,
        id: TaskId,
        user_ids: Vec<UserId>,
    ) -> Result<BTreeSet<UserId>, HubError> {
        if user_ids.is_empty() {
            return Err(HubError::validation("userIds", "at least one user id is required"));
        }
        let description = format!("Unassigned users: {}", join_ids(&user_ids));
        self.mutate(actor, id, Change::Updated(description), move |task| {
            for user in &user_ids {
                task.assigned_users.remove(user);
            }
            Ok(())
        })
        .await
        .map(|task| task.assigned_users)
    }

    /// Appends uploaded file paths.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] on an empty or blank list, or
    /// [`HubError::NotFound`].
    pub async fn add_files(
        &self,
        actor: &Actor,
        id: TaskId,
        paths: Vec<String>,
    ) -> Result<Task, HubError> {
        let paths: Vec<String> = paths
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if paths.is_empty() {
            return Err(HubError::validation("paths", "at least one file path is required"));
        }
        let description = format!("Attached {} file(s)", paths.len());
        self.mutate(actor, id, Change::Updated(description), move |task| {
            task.files.extend(paths);
            Ok(())
        })
        .await
    }

    /// Detaches one file path.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the task or the path is missing.
    pub async fn remove_file(
        &self,
        actor: &Actor,
        id: TaskId,
        path: &str,
    ) -> Result<Task, HubError> {
        let description = format!("Removed file {path}");
        self.mutate(actor, id, Change::Updated(description), |task| {
            let index = task
                .files
                .iter()
                .position(|f| f == path)
                .ok_or_else(|| HubError::NotFound(format!("file {path}")))?;
            task.files.remove(index);
            Ok(())
        })
        .await
    }

    /// Comments of a task, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the task is missing or foreign.
    pub async fn comments(&self, actor: &Actor, id: TaskId) -> Result<Vec<Comment>, HubError> {
        self.get(actor, id).await.map(|task| task.comments)
    }

    /// Adds a comment authored by the actor.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] on blank text, or
    /// [`HubError::NotFound`].
    pub async fn add_comment(
        &self,
        actor: &Actor,
        id: TaskId,
        text: &str,
    ) -> Result<Comment, HubError> {
        let text = sanitize_text(text);
        if text.is_empty() {
            return Err(HubError::validation("text", "comment text is required"));
        }
        let (task, comment) = self
            .store
            .modify(id, |task| {
                authorize(actor, task)?;
                let now = Utc::now();
                let comment = Comment {
                    id: CommentId::new(),
                    user_id: actor.user_id.clone(),
                    username: actor.username.clone(),
                    text,
                    created_at: now,
                };
                task.comments.push(comment.clone());
                activity::record(task, &Author::from(actor), Change::Commented, now);
                Ok::<_, HubError>((task.clone(), comment))
            })
            .await?;

        tracing::info!(task_id = %id, comment_id = %comment.id, "comment added");
        self.dispatcher
            .publish(&Broadcast::comment_added(&task, comment.clone()));
        Ok(comment)
    }

    /// Deletes a comment. Only its author may do so.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the task or comment is missing, or
    /// [`HubError::Forbidden`] if the actor did not write the comment.
    pub async fn delete_comment(
        &self,
        actor: &Actor,
        id: TaskId,
        comment_id: CommentId,
    ) -> Result<(), HubError> {
        let task = self
            .store
            .modify(id, |task| {
                authorize(actor, task)?;
                let comment = task
                    .comment(comment_id)
                    .ok_or_else(|| HubError::NotFound(format!("comment {comment_id}")))?;
                if comment.user_id != actor.user_id {
                    return Err(HubError::Forbidden(
                        "only the author may delete a comment".to_string(),
                    ));
                }
                task.comments.retain(|c| c.id != comment_id);
                activity::record(task, &Author::from(actor), Change::CommentDeleted, Utc::now());
                Ok(task.clone())
            })
            .await?;

        tracing::info!(task_id = %id, comment_id = %comment_id, "comment deleted");
        self.dispatcher
            .publish(&Broadcast::comment_deleted(&task, comment_id));
        Ok(())
    }

    /// Applies `f` to a tenant task, stamps it, records `change`, and
    /// broadcasts `TaskUpdated`.
    async fn mutate<F>(
        &self,
        actor: &Actor,
        id: TaskId,
        change: Change,
        f: F,
    ) -> Result<Task, HubError>
    where
        F: FnOnce(&mut Task) -> Result<(), HubError> + Send,
    {
        let task = self
            .store
            .modify(id, |task| {
                authorize(actor, task)?;
                f(task)?;
                let now = Utc::now();
                stamp(task, actor, now);
                activity::record(task, &Author::from(actor), change, now);
                Ok::<_, HubError>(task.clone())
            })
            .await?;

        tracing::info!(task_id = %id, "task updated");
        self.dispatcher.publish(&Broadcast::task_updated(&task));
        Ok(task)
    }
}

fn join_ids(ids: &[UserId]) -> String {
    ids.iter().map(UserId::as_str).collect::<Vec<_>>().join(", ")
}
