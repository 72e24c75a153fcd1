//! Room registry: which live connections are subscribed to which rooms.
//!
//! Every connection owns a bounded outbound queue drained by its socket
//! writer task. Broadcasts serialize the event once and `try_send` the shared
//! frame to each member, so a slow receiver never blocks the sender; frames
//! for a full queue are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use campus_shared::protocol::ServerEvent;
use campus_shared::types::{ConnectionId, RoomKey, UserId};

/// One serialized frame, shared between every recipient of a broadcast.
pub type Frame = Arc<str>;

struct ConnectionEntry {
    user_id: UserId,
    tx: mpsc::Sender<Frame>,
    rooms: HashSet<RoomKey>,
}

struct Room {
    members: HashSet<ConnectionId>,
    /// Held for the whole fan-out so two broadcasts on the same room reach
    /// every member in the same order.
    order: Mutex<()>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            order: Mutex::new(()),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomKey, Room>,
}

impl RegistryState {
    fn join(&mut self, id: ConnectionId, room: &RoomKey) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if !conn.rooms.insert(room.clone()) {
            return false;
        }
        self.rooms
            .entry(room.clone())
            .or_insert_with(Room::new)
            .members
            .insert(id);
        true
    }

    fn leave(&mut self, id: ConnectionId, room: &RoomKey) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if !conn.rooms.remove(room) {
            return false;
        }
        self.remove_member(id, room);
        true
    }

    fn remove_member(&mut self, id: ConnectionId, room: &RoomKey) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(r) => {
                r.members.remove(&id);
                r.members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(room);
            debug!(room = %room, "Removed empty room");
        }
    }

    fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, c)| c.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// What was left behind when a connection unregistered.
#[derive(Debug)]
pub struct Departure {
    pub user_id: UserId,
    pub rooms: Vec<RoomKey>,
    /// No other connection of the same user remains.
    pub last_for_user: bool,
}

#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection and subscribe it to its user's personal room.
    pub async fn register(&self, id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Frame>) {
        let mut state = self.state.write().await;
        state.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        state.join(id, &RoomKey::personal(user_id));

        info!(
            conn = %id.short(),
            user = %user_id,
            connections = state.connections.len(),
            "Connection registered"
        );
    }

    /// Forget a connection and remove it from every room it had joined.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        let mut state = self.state.write().await;
        let entry = state.connections.remove(&id)?;

        let rooms: Vec<RoomKey> = entry.rooms.into_iter().collect();
        for room in &rooms {
            state.remove_member(id, room);
        }
        let last_for_user = !state
            .connections
            .values()
            .any(|c| c.user_id == entry.user_id);

        info!(
            conn = %id.short(),
            user = %entry.user_id,
            rooms = rooms.len(),
            last_for_user,
            "Connection unregistered"
        );

        Some(Departure {
            user_id: entry.user_id,
            rooms,
            last_for_user,
        })
    }

    /// Subscribe `id` to `room`. Returns `false` if it already was a member
    /// or the connection is unknown.
    pub async fn join(&self, id: ConnectionId, room: &RoomKey) -> bool {
        let joined = self.state.write().await.join(id, room);
        debug!(conn = %id.short(), room = %room, joined, "Join room");
        joined
    }

    /// Unsubscribe `id` from `room`. Returns `false` if it was not a member.
    pub async fn leave(&self, id: ConnectionId, room: &RoomKey) -> bool {
        let left = self.state.write().await.leave(id, room);
        debug!(conn = %id.short(), room = %room, left, "Leave room");
        left
    }

    /// Subscribe every live connection of `user_id` to `room`.
    pub async fn join_user(&self, user_id: UserId, room: &RoomKey) -> usize {
        let mut state = self.state.write().await;
        let mut joined = 0;
        for id in state.connections_of(user_id) {
            if state.join(id, room) {
                joined += 1;
            }
        }
        joined
    }

    /// Deliver `event` to every member of `room`, sender included.
    ///
    /// Returns the number of connections the frame was queued for. An
    /// unknown or empty room is not an error.
    pub async fn broadcast(&self, room: &RoomKey, event: &ServerEvent) -> usize {
        let frame: Frame = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!(event = event.name(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let state = self.state.read().await;
        let Some(target) = state.rooms.get(room) else {
            debug!(room = %room, event = event.name(), "Broadcast to room with no members");
            return 0;
        };

        let _order = target.order.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for member in &target.members {
            if let Some(conn) = state.connections.get(member) {
                if deliver(*member, &conn.tx, &frame) {
                    delivered += 1;
                }
            }
        }

        debug!(
            room = %room,
            event = event.name(),
            recipients = delivered,
            "Broadcast"
        );
        delivered
    }

    /// Deliver `event` to the personal room of `user_id`.
    pub async fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        self.broadcast(&RoomKey::personal(user_id), event).await
    }

    /// Deliver `event` to a single connection.
    pub async fn send_to_connection(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let frame: Frame = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!(event = event.name(), error = %e, "Failed to serialize event");
                return false;
            }
        };

        let state = self.state.read().await;
        match state.connections.get(&id) {
            Some(conn) => deliver(id, &conn.tx, &frame),
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn members(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .map(|r| r.members.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub async fn is_member(&self, id: ConnectionId, room: &RoomKey) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .is_some_and(|r| r.members.contains(&id))
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}

fn deliver(id: ConnectionId, tx: &mpsc::Sender<Frame>, frame: &Frame) -> bool {
    match tx.try_send(Arc::clone(frame)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(conn = %id.short(), "Send queue full, dropping frame");
            false
        }
        // Writer already gone; unregister will follow.
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
