//! Connection registry.
//!
//! Three indices over the same set of logged-in connections:
//! connection id to metadata, user id to connection id, and room id to the
//! set of connection ids in that room. All three live behind one
//! [`RwLock`] so they are never observed out of step with each other.
//! Mutations take the write side, snapshots take the read side, and no
//! network I/O ever happens while the lock is held.

use super::{Connection, ConnectionId};
use crate::error::ServerError;
use crate::protocol::{RoomId, UserId};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Entry {
    connection: Arc<Connection>,
    user_id: UserId,
    room_id: Option<RoomId>,
    last_heartbeat: Instant,
    registered_at: Instant,
}

/// Snapshot of a registered connection's metadata.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room_id: Option<RoomId>,
    pub last_heartbeat: Instant,
    pub registered_at: Instant,
    pub remote_addr: Option<SocketAddr>,
}

/// A registered connection together with its user.
#[derive(Debug, Clone)]
pub struct Member {
    pub user_id: UserId,
    pub connection: Arc<Connection>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<ConnectionId, Entry>,
    users: HashMap<UserId, ConnectionId>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

fn detach_from_room(
    rooms: &mut HashMap<RoomId, HashSet<ConnectionId>>,
    id: ConnectionId,
    room_id: &str,
) {
    if let Some(members) = rooms.get_mut(room_id) {
        members.remove(&id);
        if members.is_empty() {
            rooms.remove(room_id);
        }
    }
}

impl RegistryState {
    /// Drops `leaving` from the user index. If another live connection still
    /// carries the same user id, the index points at it instead.
    fn unbind_user(&mut self, user_id: UserId, leaving: ConnectionId) {
        if self.users.get(&user_id) != Some(&leaving) {
            return;
        }
        self.users.remove(&user_id);
        if let Some(other) = self
            .entries
            .iter()
            .find(|(id, entry)| **id != leaving && entry.user_id == user_id)
            .map(|(id, _)| *id)
        {
            self.users.insert(user_id, other);
        }
    }

    fn remove_entry(&mut self, id: ConnectionId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.unbind_user(entry.user_id, id);
        if let Some(room_id) = &entry.room_id {
            detach_from_room(&mut self.rooms, id, room_id);
        }
        Some(entry)
    }

    fn member(&self, id: &ConnectionId) -> Option<Member> {
        self.entries.get(id).map(|entry| Member {
            user_id: entry.user_id,
            connection: entry.connection.clone(),
        })
    }
}

impl Entry {
    fn info(&self, connection_id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            connection_id,
            user_id: self.user_id,
            room_id: self.room_id.clone(),
            last_heartbeat: self.last_heartbeat,
            registered_at: self.registered_at,
            remote_addr: self.connection.remote_addr(),
        }
    }
}

/// Authoritative store of logged-in connections and their user and room
/// associations.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Registers `connection` for `user_id`.
    ///
    /// Returns `None` without touching any index when the registry is at its
    /// ceiling. A connection that is already registered is rebound to the new
    /// user id and keeps its room. If another connection is bound to
    /// `user_id`, the user index is pointed at this one and the other
    /// connection stays open.
    pub async fn add(&self, connection: Arc<Connection>, user_id: UserId) -> Option<Arc<Connection>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let id = connection.id();
        let now = Instant::now();

        if let Some(entry) = state.entries.get_mut(&id) {
            let previous_user = entry.user_id;
            entry.user_id = user_id;
            entry.last_heartbeat = now;
            if previous_user != user_id {
                state.unbind_user(previous_user, id);
            }
            state.users.insert(user_id, id);
            debug!("🔁 Connection {} rebound from user {} to {}", id, previous_user, user_id);
            return Some(connection);
        }

        if state.entries.len() >= self.max_connections {
            warn!(
                "🚫 Connection limit of {} reached, rejecting login for user {}",
                self.max_connections, user_id
            );
            return None;
        }

        state.entries.insert(
            id,
            Entry {
                connection: connection.clone(),
                user_id,
                room_id: None,
                last_heartbeat: now,
                registered_at: now,
            },
        );
        if let Some(superseded) = state.users.insert(user_id, id) {
            warn!(
                "👥 User {} logged in again on connection {}, connection {} left open",
                user_id, id, superseded
            );
        }

        debug!("➕ Registered connection {} for user {}", id, user_id);
        Some(connection)
    }

    /// Removes a connection from every index. Safe to call more than once.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let removed = self.state.write().await.remove_entry(id);
        if let Some(entry) = &removed {
            debug!("➖ Deregistered connection {} (user {})", id, entry.user_id);
        }
        removed.map(|entry| entry.info(id))
    }

    /// Moves a connection into `room_id`, leaving its previous room first.
    ///
    /// Returns the room that was left, if any.
    pub async fn join_room(
        &self,
        id: ConnectionId,
        room_id: &str,
    ) -> Result<Option<RoomId>, ServerError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(ServerError::NotAuthenticated)?;

        let previous = entry.room_id.replace(room_id.to_string());
        let left = previous.filter(|previous| previous != room_id);
        if let Some(left) = &left {
            detach_from_room(&mut state.rooms, id, left);
        }
        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(id);
        Ok(left)
    }

    /// Takes a connection out of its room. Returns the room it was in.
    pub async fn leave_room(&self, id: ConnectionId) -> Option<RoomId> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let room_id = state.entries.get_mut(&id)?.room_id.take()?;
        detach_from_room(&mut state.rooms, id, &room_id);
        Some(room_id)
    }

    pub async fn lookup_by_user(&self, user_id: UserId) -> Option<Arc<Connection>> {
        let state = self.state.read().await;
        let id = state.users.get(&user_id)?;
        state.entries.get(id).map(|entry| entry.connection.clone())
    }

    pub async fn lookup_by_connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.state
            .read()
            .await
            .entries
            .get(&id)
            .map(|entry| entry.info(id))
    }

    /// Snapshot of the members of a room.
    pub async fn members_of_room(&self, room_id: &str) -> Vec<Member> {
        let state = self.state.read().await;
        state
            .rooms
            .get(room_id)
            .map(|ids| ids.iter().filter_map(|id| state.member(id)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of every registered connection.
    pub async fn all_connections(&self) -> Vec<Member> {
        self.state
            .read()
            .await
            .entries
            .values()
            .map(|entry| Member {
                user_id: entry.user_id,
                connection: entry.connection.clone(),
            })
            .collect()
    }

    /// Records a heartbeat. Returns false if the connection is not registered.
    pub async fn touch(&self, id: ConnectionId) -> bool {
        match self.state.write().await.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes every connection whose last heartbeat is strictly older than
    /// `timeout` as of `now` and returns them. Transports are not closed.
    pub async fn evict_stale(&self, now: Instant, timeout: Duration) -> Vec<Arc<Connection>> {
        let mut state = self.state.write().await;
        let stale: Vec<ConnectionId> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_heartbeat) > timeout)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| state.remove_entry(id))
            .map(|entry| entry.connection)
            .collect()
    }

    /// Evicts connections that stopped heartbeating and closes their
    /// transports concurrently. Returns how many were removed.
    pub async fn sweep_dead(&self, timeout: Duration) -> usize {
        let stale = self.evict_stale(Instant::now(), timeout).await;
        join_all(stale.iter().map(|connection| {
            info!("💀 Connection {} missed heartbeats, closing", connection.id());
            connection.close()
        }))
        .await;
        stale.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.state.read().await.rooms.keys().cloned().collect()
    }

    /// Verifies the three indices agree with each other.
    #[cfg(test)]
    pub(crate) async fn is_consistent(&self) -> bool {
        let state = self.state.read().await;

        let rooms_match_entries = state.entries.iter().all(|(id, entry)| match &entry.room_id {
            Some(room) => state.rooms.get(room).map_or(false, |set| set.contains(id)),
            None => !state.rooms.values().any(|set| set.contains(id)),
        });
        let entries_match_rooms = state.rooms.iter().all(|(room, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    state
                        .entries
                        .get(id)
                        .map_or(false, |entry| entry.room_id.as_deref() == Some(room.as_str()))
                })
        });
        let users_match = state.users.iter().all(|(user, id)| {
            state.entries.get(id).map_or(false, |entry| entry.user_id == *user)
        }) && state
            .entries
            .values()
            .all(|entry| state.users.contains_key(&entry.user_id));

        rooms_match_entries && entries_match_rooms && users_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{recording_connection, stalled_connection};

    #[tokio::test]
    async fn test_add_and_lookup() {
        let registry = ConnectionRegistry::new(10);
        let (connection, _) = recording_connection();

        assert!(registry.add(connection.clone(), 42).await.is_some());
        let found = registry.lookup_by_user(42).await.unwrap();
        assert_eq!(found.id(), connection.id());

        let info = registry.lookup_by_connection(connection.id()).await.unwrap();
        assert_eq!(info.user_id, 42);
        assert!(info.room_id.is_none());
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_capacity_rejects_without_mutation() {
        let registry = ConnectionRegistry::new(2);
        let (a, _) = recording_connection();
        let (b, _) = recording_connection();
        let (c, _) = recording_connection();

        registry.add(a, 1).await.unwrap();
        registry.add(b.clone(), 2).await.unwrap();
        registry.join_room(b.id(), "r1").await.unwrap();

        assert!(registry.add(c.clone(), 3).await.is_none());
        assert_eq!(registry.connection_count().await, 2);
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.lookup_by_user(3).await.is_none());
        assert!(registry.lookup_by_connection(c.id()).await.is_none());
        assert!(registry.is_consistent().await);

        // A registered connection logging in again is not a new admission.
        assert!(registry.add(b.clone(), 2).await.is_some());
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_login_replaces_user_entry() {
        let registry = ConnectionRegistry::new(10);
        let (first, first_sink) = recording_connection();
        let (second, _) = recording_connection();

        registry.add(first.clone(), 7).await.unwrap();
        registry.add(second.clone(), 7).await.unwrap();

        assert_eq!(registry.lookup_by_user(7).await.unwrap().id(), second.id());
        assert_eq!(registry.connection_count().await, 2);
        assert!(!first_sink.was_closed());
        assert!(registry.is_consistent().await);

        // Dropping the superseded connection leaves the newer binding alone.
        registry.remove(first.id()).await;
        assert_eq!(registry.lookup_by_user(7).await.unwrap().id(), second.id());

        registry.remove(second.id()).await;
        assert!(registry.lookup_by_user(7).await.is_none());
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_remove_newest_of_duplicate_rebinds_survivor() {
        let registry = ConnectionRegistry::new(10);
        let (first, _) = recording_connection();
        let (second, _) = recording_connection();

        registry.add(first.clone(), 7).await.unwrap();
        registry.add(second.clone(), 7).await.unwrap();
        registry.remove(second.id()).await;

        assert_eq!(registry.lookup_by_user(7).await.unwrap().id(), first.id());
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_relogin_with_new_user_id() {
        let registry = ConnectionRegistry::new(10);
        let (connection, _) = recording_connection();

        registry.add(connection.clone(), 1).await.unwrap();
        registry.join_room(connection.id(), "r1").await.unwrap();
        registry.add(connection.clone(), 2).await.unwrap();

        assert!(registry.lookup_by_user(1).await.is_none());
        let info = registry.lookup_by_connection(connection.id()).await.unwrap();
        assert_eq!(info.user_id, 2);
        assert_eq!(info.room_id.as_deref(), Some("r1"));
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_room_membership_stays_consistent() {
        let registry = ConnectionRegistry::new(10);
        let (a, _) = recording_connection();
        let (b, _) = recording_connection();
        let (c, _) = recording_connection();
        registry.add(a.clone(), 1).await.unwrap();
        registry.add(b.clone(), 2).await.unwrap();
        registry.add(c.clone(), 3).await.unwrap();

        assert_eq!(registry.join_room(a.id(), "r1").await.unwrap(), None);
        registry.join_room(b.id(), "r1").await.unwrap();
        registry.join_room(c.id(), "r2").await.unwrap();
        assert!(registry.is_consistent().await);

        // Switching rooms leaves the old one first.
        assert_eq!(
            registry.join_room(a.id(), "r2").await.unwrap(),
            Some("r1".to_string())
        );
        assert_eq!(registry.members_of_room("r1").await.len(), 1);
        assert_eq!(registry.members_of_room("r2").await.len(), 2);
        assert!(registry.is_consistent().await);

        // Rejoining the same room is a no-op.
        assert_eq!(registry.join_room(a.id(), "r2").await.unwrap(), None);
        assert_eq!(registry.members_of_room("r2").await.len(), 2);

        assert_eq!(registry.leave_room(b.id()).await, Some("r1".to_string()));
        assert_eq!(registry.leave_room(b.id()).await, None);
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.is_consistent().await);

        registry.remove(c.id()).await;
        registry.remove(c.id()).await;
        let members: Vec<UserId> = registry
            .members_of_room("r2")
            .await
            .into_iter()
            .map(|member| member.user_id)
            .collect();
        assert_eq!(members, vec![1]);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_join_requires_registration() {
        let registry = ConnectionRegistry::new(10);
        let (connection, _) = recording_connection();
        assert!(matches!(
            registry.join_room(connection.id(), "r1").await,
            Err(ServerError::NotAuthenticated)
        ));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_evict_stale_is_exact() {
        let registry = ConnectionRegistry::new(10);
        let (old, _) = recording_connection();
        let (fresh, _) = recording_connection();

        registry.add(old.clone(), 1).await.unwrap();
        registry.join_room(old.id(), "r1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.add(fresh.clone(), 2).await.unwrap();

        let old_seen = registry.lookup_by_connection(old.id()).await.unwrap().last_heartbeat;
        let fresh_seen = registry.lookup_by_connection(fresh.id()).await.unwrap().last_heartbeat;
        let gap = fresh_seen - old_seen;

        // Exactly at the timeout is not stale.
        assert!(registry.evict_stale(fresh_seen, gap).await.is_empty());

        let evicted = registry.evict_stale(fresh_seen, gap / 2).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), old.id());
        assert!(registry.lookup_by_connection(fresh.id()).await.is_some());
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_sweep_closes_stale_transport() {
        let registry = ConnectionRegistry::new(10);
        let (stale, stale_sink) = recording_connection();
        let (live, live_sink) = recording_connection();
        registry.add(stale.clone(), 1).await.unwrap();
        registry.add(live.clone(), 2).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.touch(live.id()).await);

        assert_eq!(registry.sweep_dead(Duration::from_millis(30)).await, 1);
        assert!(stale_sink.was_closed());
        assert!(stale.is_closed());
        assert!(!live_sink.was_closed());
        assert!(registry.lookup_by_user(1).await.is_none());
        assert!(registry.lookup_by_user(2).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_not_held_up_by_unresponsive_peers() {
        let registry = ConnectionRegistry::new(10);
        let first = stalled_connection(Duration::from_millis(300));
        let second = stalled_connection(Duration::from_millis(300));
        let (quiet, quiet_sink) = recording_connection();
        registry.add(first.clone(), 1).await.unwrap();
        registry.add(second.clone(), 2).await.unwrap();
        registry.add(quiet.clone(), 3).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let started = Instant::now();
        let evicted = tokio::time::timeout(
            Duration::from_secs(2),
            registry.sweep_dead(Duration::from_millis(10)),
        )
        .await
        .expect("sweep should not wait on unresponsive peers");

        assert_eq!(evicted, 3);
        // Closes run side by side, so two stalled peers cost one close timeout.
        assert!(started.elapsed() < Duration::from_millis(550));
        assert!(first.is_closed() && second.is_closed());
        assert!(quiet_sink.was_closed());
        assert_eq!(registry.connection_count().await, 0);
    }
}
