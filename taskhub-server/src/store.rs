//! Task store contract and the in-memory implementation.
//!
//! The store is the only place the hub waits. Every mutation goes through
//! [`TaskStore::modify`] or [`TaskStore::remove_with`], which run a closure
//! against the current record and commit its result atomically, so a
//! concurrent writer can never interleave between the read and the write.

use std::future::{Future, ready};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use taskhub_proto::share::ShareToken;
use taskhub_proto::task::{Task, TaskId, TaskStatus, TenantId};

/// Errors raised by a task store backend.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// No task with this id exists.
    #[error("task {0} not found")]
    NotFound(TaskId),
    /// Another task already carries this share token.
    #[error("share token already in use")]
    DuplicateShareToken,
    /// The backend failed.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Predicate for [`TaskStore::find`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Owning tenant.
    pub tenant_id: Option<TenantId>,
    /// Current share token.
    pub share_token: Option<ShareToken>,
    /// Only tasks not `Done` with `dueDate <= due_before`.
    pub open_due_before: Option<DateTime<Utc>>,
}

impl TaskFilter {
    /// All tasks of one tenant.
    #[must_use]
    pub const fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            share_token: None,
            open_due_before: None,
        }
    }

    /// The task currently carrying a share token.
    #[must_use]
    pub const fn share_token(token: ShareToken) -> Self {
        Self {
            tenant_id: None,
            share_token: Some(token),
            open_due_before: None,
        }
    }

    /// Narrows to tasks that are not done and due at or before `at`.
    #[must_use]
    pub const fn open_due_before(mut self, at: DateTime<Utc>) -> Self {
        self.open_due_before = Some(at);
        self
    }

    /// Returns `true` if `task` satisfies every set field.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.tenant_id.as_ref().is_none_or(|t| &task.tenant_id == t)
            && self
                .share_token
                .as_ref()
                .is_none_or(|token| task.share.token() == Some(token))
            && self
                .open_due_before
                .is_none_or(|at| task.status != TaskStatus::Done && task.due_date <= at)
    }
}

/// Persistent task storage.
///
/// Implementations must make `modify` and `remove_with` atomic with respect
/// to each other for the same task id, and must keep share tokens unique.
pub trait TaskStore: Send + Sync + 'static {
    /// Inserts a new task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn insert(&self, task: Task) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetches a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn get(&self, id: TaskId) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Returns every task matching `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn find(&self, filter: TaskFilter)
    -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Runs `f` against the current record and commits the result if `f`
    /// returns `Ok`. Nothing is written if `f` fails.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a [`StoreError`] converted into `E` if the
    /// task is missing or the new share token is already taken.
    fn modify<F, T, E>(&self, id: TaskId, f: F) -> impl Future<Output = Result<T, E>> + Send
    where
        F: FnOnce(&mut Task) -> Result<T, E> + Send,
        T: Send,
        E: From<StoreError> + Send;

    /// Runs `f` against the current record and deletes the task if `f`
    /// returns `Ok`, yielding the final snapshot.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or [`StoreError::NotFound`] converted into `E`.
    fn remove_with<F, E>(&self, id: TaskId, f: F) -> impl Future<Output = Result<Task, E>> + Send
    where
        F: FnOnce(&mut Task) -> Result<(), E> + Send,
        E: From<StoreError> + Send;
}

/// In-memory [`TaskStore`] with per-entry locking.
///
/// Tasks live in a sharded map, so writers to different tasks do not
/// serialize. Share tokens are indexed in a second map. A token entry may
/// be locked while a task entry is held, never the other way round.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
    by_token: DashMap<ShareToken, TaskId>,
}

impl MemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the store holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Points `token` at `id`, failing if another task owns it.
    fn claim_token(&self, token: &ShareToken, id: TaskId) -> Result<(), StoreError> {
        match self.by_token.entry(token.clone()) {
            Entry::Occupied(owner) if *owner.get() != id => Err(StoreError::DuplicateShareToken),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn insert_sync(&self, task: Task) -> Result<(), StoreError> {
        if let Some(token) = task.share.token() {
            self.claim_token(token, task.id)?;
        }
        self.tasks.insert(task.id, task);
        Ok(())
    }

    fn get_sync(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|task| task.value().clone())
    }

    fn find_sync(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut found: Vec<Task> = if let Some(token) = &filter.share_token {
            let owner = self.by_token.get(token).map(|id| *id.value());
            owner
                .and_then(|id| self.get_sync(id))
                .filter(|task| filter.matches(task))
                .into_iter()
                .collect()
        } else {
            self.tasks
                .iter()
                .filter(|task| filter.matches(task.value()))
                .map(|task| task.value().clone())
                .collect()
        };
        found.sort_by_key(|task| task.id);
        found
    }

    fn modify_sync<F, T, E>(&self, id: TaskId, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Task) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut current = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let mut scratch = current.value().clone();
        let old_token = current.share.token().cloned();
        let out = f(&mut scratch)?;

        // Tenant ownership and identity never change through modify.
        scratch.id = id;
        scratch.tenant_id = current.tenant_id.clone();

        let new_token = scratch.share.token().cloned();
        if new_token != old_token {
            if let Some(token) = &new_token {
                self.claim_token(token, id)?;
            }
            if let Some(token) = &old_token {
                self.by_token.remove(token);
            }
        }
        *current.value_mut() = scratch;
        drop(current);
        Ok(out)
    }

    fn remove_sync<F, E>(&self, id: TaskId, f: F) -> Result<Task, E>
    where
        F: FnOnce(&mut Task) -> Result<(), E>,
        E: From<StoreError>,
    {
        let Entry::Occupied(entry) = self.tasks.entry(id) else {
            return Err(StoreError::NotFound(id).into());
        };
        let mut snapshot = entry.get().clone();
        f(&mut snapshot)?;
        let removed = entry.remove();
        if let Some(token) = removed.share.token() {
            self.by_token.remove(token);
        }
        Ok(snapshot)
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert(&self, task: Task) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.insert_sync(task))
    }

    fn get(&self, id: TaskId) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send {
        ready(Ok(self.get_sync(id)))
    }

    fn find(
        &self,
        filter: TaskFilter,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send {
        ready(Ok(self.find_sync(&filter)))
    }

    fn modify<F, T, E>(&self, id: TaskId, f: F) -> impl Future<Output = Result<T, E>> + Send
    where
        F: FnOnce(&mut Task) -> Result<T, E> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        ready(self.modify_sync(id, f))
    }

    fn remove_with<F, E>(&self, id: TaskId, f: F) -> impl Future<Output = Result<Task, E>> + Send
    where
        F: FnOnce(&mut Task) -> Result<(), E> + Send,
        E: From<StoreError> + Send,
    {
        ready(self.remove_sync(id, f))
    }
}
