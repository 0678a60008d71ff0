//! Real-time fan-out hub: connection registry and room membership.
//!
//! Two kinds of rooms exist. A [`Room::User`] room holds every connection of
//! one user and carries events aimed at exactly that user ("you were granted
//! access", "access was revoked"). A [`Room::List`] room holds every
//! connection currently subscribed to one list and carries changes to the
//! list and its tasks.
//!
//! Connection lifecycle:
//! 1. [`Hub::connect`] after a verified handshake; joins the user room.
//! 2. [`Hub::subscribe_lists`] whenever the client announces its accessible
//!    lists; the hub diffs old against new and joins/leaves list rooms.
//! 3. [`Hub::disconnect`] on connection loss; drops every membership.
//!
//! The hub never authorizes. Only members of a room receive its events, and
//! membership is driven by what clients announce.
//!
//! Lock order is always `connections` before `rooms`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use taskshare_proto::ids::{ListId, UserId};
use taskshare_proto::wire::{HubEvent, HubMessage};
use tokio::sync::{RwLock, mpsc};

/// Identifies one live connection.
pub type ConnId = u64;

/// A fan-out channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every connection of one user.
    User(UserId),
    /// Every connection subscribed to one list.
    List(ListId),
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::List(id) => write!(f, "list:{id}"),
        }
    }
}

/// Item handed to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and send this frame.
    Frame(HubMessage),
    /// Close the socket.
    Close,
}

/// Change in list-room membership caused by one announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    /// Rooms newly joined.
    pub joined: Vec<ListId>,
    /// Rooms left.
    pub left: Vec<ListId>,
}

struct Connection {
    user_id: UserId,
    sender: mpsc::UnboundedSender<Outbound>,
    lists: BTreeSet<ListId>,
}

/// Process-scoped registry of connections and rooms.
///
/// Construct one at server start, share it as `Arc<Hub>` with the
/// enforcement layer and socket handlers, and call [`Hub::shutdown`] on exit.
pub struct Hub {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnId, Connection>>,
    rooms: RwLock<HashMap<Room, HashSet<ConnId>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a verified connection and joins its user room.
    pub async fn connect(
        &self,
        user_id: UserId,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> ConnId {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);
        let room = Room::User(user_id.clone());

        let mut conns = self.connections.write().await;
        let mut rooms = self.rooms.write().await;
        conns.insert(
            conn,
            Connection {
                user_id,
                sender,
                lists: BTreeSet::new(),
            },
        );
        rooms.entry(room).or_default().insert(conn);
        drop(rooms);
        drop(conns);

        conn
    }

    /// Removes a connection and every room membership it held.
    ///
    /// Returns `false` if the connection was not registered.
    pub async fn disconnect(&self, conn: ConnId) -> bool {
        let mut conns = self.connections.write().await;
        let Some(connection) = conns.remove(&conn) else {
            return false;
        };
        let mut rooms = self.rooms.write().await;
        leave_room(&mut rooms, &Room::User(connection.user_id), conn);
        for list_id in connection.lists {
            leave_room(&mut rooms, &Room::List(list_id), conn);
        }
        drop(rooms);
        drop(conns);
        true
    }

    /// Replaces the set of list rooms a connection belongs to.
    ///
    /// Joins rooms for ids not previously announced and leaves rooms for ids
    /// no longer present. Returns `None` if the connection is unknown.
    pub async fn subscribe_lists(
        &self,
        conn: ConnId,
        list_ids: impl IntoIterator<Item = ListId>,
    ) -> Option<SubscriptionDiff> {
        let wanted: BTreeSet<ListId> = list_ids.into_iter().collect();

        let mut conns = self.connections.write().await;
        let connection = conns.get_mut(&conn)?;
        let diff = SubscriptionDiff {
            joined: wanted.difference(&connection.lists).copied().collect(),
            left: connection.lists.difference(&wanted).copied().collect(),
        };

        let mut rooms = self.rooms.write().await;
        for list_id in &diff.joined {
            rooms.entry(Room::List(*list_id)).or_default().insert(conn);
        }
        for list_id in &diff.left {
            leave_room(&mut rooms, &Room::List(*list_id), conn);
        }
        drop(rooms);
        connection.lists = wanted;
        drop(conns);

        Some(diff)
    }

    /// Removes every connection of `user` from a list room.
    ///
    /// Used when the user's access to the list is revoked, so no further
    /// list broadcast reaches them before their next announcement.
    pub async fn evict_user(&self, user: &UserId, list_id: ListId) -> usize {
        let mut conns = self.connections.write().await;
        let mut rooms = self.rooms.write().await;
        let mut evicted = 0;
        for (conn, connection) in conns.iter_mut() {
            if &connection.user_id == user && connection.lists.remove(&list_id) {
                leave_room(&mut rooms, &Room::List(list_id), *conn);
                evicted += 1;
            }
        }
        drop(rooms);
        drop(conns);
        evicted
    }

    /// Removes one connection from the given list rooms.
    ///
    /// Returns the ids it actually left.
    pub async fn leave_lists(&self, conn: ConnId, list_ids: &[ListId]) -> Vec<ListId> {
        let mut conns = self.connections.write().await;
        let Some(connection) = conns.get_mut(&conn) else {
            return Vec::new();
        };
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        for list_id in list_ids {
            if connection.lists.remove(list_id) {
                leave_room(&mut rooms, &Room::List(*list_id), conn);
                left.push(*list_id);
            }
        }
        drop(rooms);
        drop(conns);
        left
    }

    /// Drops a list room entirely, e.g. after the list was deleted.
    pub async fn close_list_room(&self, list_id: ListId) {
        let mut conns = self.connections.write().await;
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.remove(&Room::List(list_id)) {
            for conn in members {
                if let Some(connection) = conns.get_mut(&conn) {
                    connection.lists.remove(&list_id);
                }
            }
        }
        drop(rooms);
        drop(conns);
    }

    /// Delivers an event to every member of `room`.
    ///
    /// Returns the number of connections the event was handed to.
    pub async fn publish(&self, room: Room, event: HubEvent) -> usize {
        self.publish_to(&[room], event).await
    }

    /// Delivers an event to the members of several rooms, at most once per
    /// connection.
    pub async fn publish_to(&self, rooms: &[Room], event: HubEvent) -> usize {
        let conns = self.connections.read().await;
        let room_table = self.rooms.read().await;

        let targets: BTreeSet<ConnId> = rooms
            .iter()
            .filter_map(|room| room_table.get(room))
            .flatten()
            .copied()
            .collect();
        drop(room_table);

        let name = event.name();
        let frame = HubMessage::Event(event);
        let mut delivered = 0;
        for conn in &targets {
            let Some(connection) = conns.get(conn) else {
                continue;
            };
            if connection
                .sender
                .send(Outbound::Frame(frame.clone()))
                .is_ok()
            {
                delivered += 1;
            } else {
                tracing::debug!(conn = conn, event = name, "connection writer gone, skipping");
            }
        }
        drop(conns);

        tracing::debug!(
            event = name,
            rooms = rooms.len(),
            delivered = delivered,
            "event published"
        );
        delivered
    }

    /// Sends a frame to a single connection.
    ///
    /// Returns `false` if the connection is unknown or its writer is gone.
    pub async fn send(&self, conn: ConnId, msg: HubMessage) -> bool {
        let conns = self.connections.read().await;
        conns
            .get(&conn)
            .is_some_and(|c| c.sender.send(Outbound::Frame(msg)).is_ok())
    }

    /// Connection ids currently in `room`.
    pub async fn members(&self, room: &Room) -> Vec<ConnId> {
        let rooms = self.rooms.read().await;
        let mut members: Vec<ConnId> = rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        drop(rooms);
        members.sort_unstable();
        members
    }

    /// List rooms a connection currently belongs to.
    pub async fn subscriptions(&self, conn: ConnId) -> Option<BTreeSet<ListId>> {
        let conns = self.connections.read().await;
        conns.get(&conn).map(|c| c.lists.clone())
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of non-empty rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Asks every connection to close and clears all state.
    pub async fn shutdown(&self) {
        let mut conns = self.connections.write().await;
        let mut rooms = self.rooms.write().await;
        for (conn, connection) in conns.drain() {
            tracing::info!(conn = conn, user = %connection.user_id, "closing connection");
            let _ = connection.sender.send(Outbound::Close);
        }
        rooms.clear();
        drop(rooms);
        drop(conns);
    }
}

/// Removes `conn` from `room`, pruning the room when it empties.
fn leave_room(rooms: &mut HashMap<Room, HashSet<ConnId>>, room: &Room, conn: ConnId) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(&conn);
        if members.is_empty() {
            rooms.remove(room);
        }
    }
}
