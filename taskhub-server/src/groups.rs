//! Group membership registry.
//!
//! Tracks which live connections belong to which broadcast groups. A group
//! is named by a tenant id, a user id, or a public share token; it exists
//! while it has at least one member and is collected when the last member
//! leaves.
//!
//! Connections are referred to by opaque [`ConnectionId`] handles handed out
//! by [`GroupRegistry::register`]. The registry owns each connection's
//! outbound channel; the transport owns the socket.
//!
//! Locking is per group. The outer group map is only write-locked to create
//! or collect a group, so fan-out to one group never waits on joins to
//! another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use taskhub_proto::share::ShareToken;
use taskhub_proto::task::{TenantId, UserId};
use tokio::sync::mpsc;

/// An encoded frame queued for delivery. Shared between all recipients.
pub type Outbound = Arc<str>;

/// Opaque handle for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Name of a broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(String);

impl GroupId {
    /// Wraps a raw group name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the group name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&TenantId> for GroupId {
    fn from(id: &TenantId) -> Self {
        Self(id.as_str().to_string())
    }
}

impl From<&UserId> for GroupId {
    fn from(id: &UserId) -> Self {
        Self(id.as_str().to_string())
    }
}

impl From<&ShareToken> for GroupId {
    fn from(token: &ShareToken) -> Self {
        Self(token.as_str().to_string())
    }
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection handle is not (or no longer) registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Outcome of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Members whose queue accepted the frame.
    pub delivered: usize,
    /// Members whose queue was already closed.
    pub failed: usize,
}

struct Connection {
    sender: mpsc::UnboundedSender<Outbound>,
    groups: Mutex<HashSet<GroupId>>,
}

#[derive(Default)]
struct Group {
    members: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
}

/// Concurrent connection ↔ group registry.
pub struct GroupRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    groups: RwLock<HashMap<GroupId, Arc<Group>>>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection's outbound queue and returns its handle.
    pub fn register(&self, sender: mpsc::UnboundedSender<Outbound>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection {
            sender,
            groups: Mutex::new(HashSet::new()),
        });
        self.connections.write().insert(id, conn);
        tracing::debug!(conn = %id, "connection registered");
        id
    }

    /// Removes a connection from every group and releases its handle.
    ///
    /// Returns the number of groups the connection was removed from, or
    /// `None` if the handle was not registered.
    pub fn unregister(&self, id: ConnectionId) -> Option<usize> {
        let conn = self.connections.write().remove(&id)?;
        let groups: Vec<GroupId> = conn.groups.lock().drain().collect();
        for group in &groups {
            self.remove_member(group, id);
        }
        tracing::debug!(conn = %id, groups = groups.len(), "connection unregistered");
        Some(groups.len())
    }

    /// Adds a connection to a group. Idempotent.
    ///
    /// No authorization is performed here; callers decide whether the
    /// connection may join.
    ///
    /// Returns `true` if the connection was newly added.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if the handle is not registered.
    pub fn join(&self, id: ConnectionId, group: &GroupId) -> Result<bool, RegistryError> {
        let conn = self
            .connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownConnection(id))?;

        let added = {
            let groups = self.groups.read();
            groups
                .get(group)
                .map(|g| g.members.lock().insert(id, conn.sender.clone()).is_none())
        };
        let added = added.unwrap_or_else(|| {
            let mut groups = self.groups.write();
            let entry = groups.entry(group.clone()).or_default();
            let added = entry.members.lock().insert(id, conn.sender.clone()).is_none();
            drop(groups);
            added
        });

        conn.groups.lock().insert(group.clone());

        // A concurrent unregister may have drained the group set before the
        // insert above; undo so the group does not keep a dead member.
        if !self.connections.read().contains_key(&id) {
            conn.groups.lock().remove(group);
            self.remove_member(group, id);
            return Err(RegistryError::UnknownConnection(id));
        }

        if added {
            tracing::debug!(conn = %id, group = %group, "joined group");
        }
        Ok(added)
    }

    /// Removes a connection from one group.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&self, id: ConnectionId, group: &GroupId) -> bool {
        let Some(conn) = self.connections.read().get(&id).cloned() else {
            return false;
        };
        if !conn.groups.lock().remove(group) {
            return false;
        }
        self.remove_member(group, id);
        tracing::debug!(conn = %id, group = %group, "left group");
        true
    }

    /// Enqueues `frame` for every current member of `group`.
    ///
    /// Never blocks on a receiver. Members whose queue is closed are counted
    /// as failed but stay registered until [`prune_closed`](Self::prune_closed)
    /// or their transport's own cleanup removes them.
    ///
    /// The group lock is held while enqueuing, so every member observes
    /// dispatches to the same group in one order.
    pub fn dispatch(&self, group: &GroupId, frame: &Outbound) -> Delivery {
        let mut delivery = Delivery::default();
        let groups = self.groups.read();
        let Some(target) = groups.get(group) else {
            return delivery;
        };
        let members = target.members.lock();
        for (id, sender) in members.iter() {
            if sender.send(Arc::clone(frame)).is_ok() {
                delivery.delivered += 1;
            } else {
                delivery.failed += 1;
                tracing::debug!(conn = %id, group = %group, "dropping frame for closed connection");
            }
        }
        drop(members);
        drop(groups);
        delivery
    }

    /// Enqueues `frame` for a single connection.
    ///
    /// Returns `false` if the connection is unknown or its queue is closed.
    pub fn send_to(&self, id: ConnectionId, frame: Outbound) -> bool {
        self.connections
            .read()
            .get(&id)
            .is_some_and(|conn| conn.sender.send(frame).is_ok())
    }

    /// Unregisters every connection whose outbound queue has been closed.
    ///
    /// Called once per heartbeat interval. Returns the removed handles.
    pub fn prune_closed(&self) -> Vec<ConnectionId> {
        let closed: Vec<ConnectionId> = self
            .connections
            .read()
            .iter()
            .filter(|(_, conn)| conn.sender.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in &closed {
            self.unregister(*id);
        }
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "pruned closed connections");
        }
        closed
    }

    /// Number of members in a group (zero if the group does not exist).
    #[must_use]
    pub fn group_size(&self, group: &GroupId) -> usize {
        self.groups
            .read()
            .get(group)
            .map_or(0, |g| g.members.lock().len())
    }

    /// Groups a connection currently belongs to, sorted by name.
    #[must_use]
    pub fn groups_of(&self, id: ConnectionId) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self
            .connections
            .read()
            .get(&id)
            .map(|conn| conn.groups.lock().iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of non-empty groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    /// Removes `id` from `group`, collecting the group if it becomes empty.
    fn remove_member(&self, group: &GroupId, id: ConnectionId) {
        let now_empty = {
            let groups = self.groups.read();
            let Some(target) = groups.get(group) else {
                return;
            };
            let mut members = target.members.lock();
            members.remove(&id);
            members.is_empty()
        };
        if now_empty {
            let mut groups = self.groups.write();
            // Re-check under the write lock: a join may have landed in between.
            if groups
                .get(group)
                .is_some_and(|g| g.members.lock().is_empty())
            {
                groups.remove(group);
                tracing::debug!(group = %group, "collected empty group");
            }
        }
    }
}
