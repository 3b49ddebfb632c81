//! Connection registry: which sockets exist, who they belong to, and which
//! rooms they joined.
//!
//! One instance per process, injected wherever membership decisions are
//! made. Memberships are only meaningful on the instance the socket is
//! connected to; horizontal scaling would need a shared backing store.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use clinsync_core::{ConnectionId, ConnectionInfo, Room, RoomMessage, Target};

#[derive(Debug, Default)]
struct ConnectionState {
    /// Identity, present after `user_login`.
    info: Option<ConnectionInfo>,
    rooms: HashSet<Room>,
}

/// Registry of live connections and their room memberships.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub async fn register(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        connections.insert(id, ConnectionState::default());
        debug!(
            subsystem = "realtime",
            component = "registry",
            connection_id = %id,
            connection_count = connections.len(),
            "Connection registered"
        );
    }

    /// Drop a connection and all its memberships. Returns the identity that
    /// was bound, so the caller can announce the departure.
    pub async fn deregister(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let mut connections = self.connections.write().await;
        let state = connections.remove(&id)?;
        debug!(
            subsystem = "realtime",
            component = "registry",
            connection_id = %id,
            connection_count = connections.len(),
            "Connection deregistered"
        );
        state.info
    }

    /// Bind a user identity to a connection. Overwrites any earlier login
    /// on the same socket.
    pub async fn bind_user(&self, id: ConnectionId, user_id: Uuid, clinic_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            Some(state) => {
                state.info = Some(ConnectionInfo::new(user_id, clinic_id));
                true
            }
            None => false,
        }
    }

    /// Record which patient the connection is currently viewing.
    pub async fn set_current_patient(&self, id: ConnectionId, patient_id: Option<Uuid>) {
        let mut connections = self.connections.write().await;
        if let Some(info) = connections.get_mut(&id).and_then(|s| s.info.as_mut()) {
            info.current_patient_id = patient_id;
        }
    }

    /// Join a room. Returns false for an unknown connection.
    pub async fn join(&self, id: ConnectionId, room: Room) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            Some(state) => {
                state.rooms.insert(room);
                debug!(
                    subsystem = "realtime",
                    component = "registry",
                    connection_id = %id,
                    room = %room,
                    "Joined room"
                );
                true
            }
            None => false,
        }
    }

    /// Leave a room.
    pub async fn leave(&self, id: ConnectionId, room: Room) {
        let mut connections = self.connections.write().await;
        if let Some(state) = connections.get_mut(&id) {
            state.rooms.remove(&room);
        }
    }

    pub async fn is_member(&self, id: ConnectionId, room: Room) -> bool {
        let connections = self.connections.read().await;
        connections
            .get(&id)
            .map(|s| s.rooms.contains(&room))
            .unwrap_or(false)
    }

    /// The identity bound to a connection, if it logged in.
    pub async fn identity(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(&id).and_then(|s| s.info.clone())
    }

    /// Number of live connections, identified or not.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Identities of all logged-in connections.
    pub async fn identified_connections(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter_map(|s| s.info.clone())
            .collect()
    }

    /// Whether `message` should be written to connection `id`.
    ///
    /// Applies sender exclusion first, then resolves the target against
    /// this connection's memberships.
    pub async fn should_deliver(&self, id: ConnectionId, message: &RoomMessage) -> bool {
        if message.exclude == Some(id) {
            return false;
        }
        match message.target {
            Target::Broadcast => true,
            Target::Connection(target) => target == id,
            Target::Room(room) => self.is_member(id, room).await,
        }
    }
}
