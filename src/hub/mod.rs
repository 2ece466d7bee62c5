mod conn;
mod ws;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::db::{MessageView, Role};

pub use conn::ConnectionState;
pub use ws::socket;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    NewMessage(MessageView),
    MessageUnsent {
        room_id: String,
        message_id: String,
        text: String,
    },
    MessagesReadUpdate {
        room_id: String,
        reader_id: String,
        reader_name: String,
        message_ids: Vec<String>,
    },
    MemberAdded {
        room_id: String,
        user_ids: Vec<String>,
        added_by: String,
    },
    MemberLeft {
        room_id: String,
        user_ids: Vec<String>,
        removed_by: Option<String>,
    },
    MemberRoleChanged {
        room_id: String,
        user_id: String,
        role: Role,
        changed_by: String,
    },
    RoomDeleted {
        room_id: String,
        deleted_by: String,
    },
    NewRoomCreated {
        room_id: String,
        name: Option<String>,
        is_group: bool,
        added_by: String,
    },
    RoomUpdated {
        room_id: String,
        image_url: Option<String>,
    },
    JoinRequested {
        room_id: String,
        user_id: String,
        user_name: String,
    },
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
        last_seen_at: i64,
    },
    UserTyping {
        room_id: String,
        user_id: String,
    },
    UserStoppedTyping {
        room_id: String,
        user_id: String,
    },
}

/// Frames a client may send; the payload is a bare room id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(String),
    LeaveRoom(String),
    TypingStart(String),
    TypingStop(String),
}

/// Where services push events. The hub trusts its callers: authorization
/// happens before anything reaches a sink.
pub trait EventSink: Send + Sync {
    fn to_room(&self, room_id: &str, event: ServerEvent);
    fn to_user(&self, user_id: &str, event: ServerEvent);
    fn to_everyone(&self, event: ServerEvent);
    fn attach_user(&self, user_id: &str, room_id: &str);
    fn detach_user(&self, user_id: &str, room_id: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    User(String),
    Room(String),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{id}"),
            Channel::Room(id) => write!(f, "room:{id}"),
        }
    }
}

pub type ConnId = u64;
pub type Outbox = mpsc::UnboundedSender<Arc<ServerEvent>>;

struct Connection {
    user_id: String,
    state: ConnectionState,
    outbox: Outbox,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnId, Connection>,
    channels: HashMap<Channel, HashSet<ConnId>>,
}

impl Registry {
    fn subscribe(&mut self, channel: Channel, conn: ConnId) {
        self.channels.entry(channel).or_default().insert(conn);
    }

    fn unsubscribe(&mut self, channel: &Channel, conn: ConnId) {
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.remove(&conn);
            if subscribers.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    fn join(&mut self, conn: ConnId, room_id: &str) -> bool {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return false;
        };
        if !connection.state.join(room_id) {
            return false;
        }
        self.subscribe(Channel::Room(room_id.to_owned()), conn);
        true
    }

    fn leave(&mut self, conn: ConnId, room_id: &str) -> bool {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return false;
        };
        if !connection.state.leave(room_id) {
            return false;
        }
        self.unsubscribe(&Channel::Room(room_id.to_owned()), conn);
        true
    }

    fn user_connections(&self, user_id: &str) -> Vec<ConnId> {
        self.channels
            .get(&Channel::User(user_id.to_owned()))
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct Hub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, user_id: &str, outbox: Outbox) -> (ConnId, bool) {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = ConnectionState::Connecting;
        state.authenticate(user_id);

        let mut registry = self.write();
        let first = registry.user_connections(user_id).is_empty();
        registry.connections.insert(conn, Connection {
            user_id: user_id.to_owned(),
            state,
            outbox,
        });
        registry.subscribe(Channel::User(user_id.to_owned()), conn);

        tracing::debug!(conn, user_id, "connection registered");
        (conn, first)
    }

    /// Drops the connection and all of its subscriptions. Returns its user
    /// and whether that user has no live connection left.
    pub fn unregister(&self, conn: ConnId) -> Option<(String, bool)> {
        let mut registry = self.write();
        let mut connection = registry.connections.remove(&conn)?;

        for room_id in connection.state.close() {
            registry.unsubscribe(&Channel::Room(room_id), conn);
        }
        registry.unsubscribe(&Channel::User(connection.user_id.clone()), conn);

        let last = registry.user_connections(&connection.user_id).is_empty();
        tracing::debug!(conn, user_id = %connection.user_id, last, "connection closed");
        Some((connection.user_id, last))
    }

    pub fn join(&self, conn: ConnId, room_id: &str) -> bool {
        self.write().join(conn, room_id)
    }

    pub fn join_all(&self, conn: ConnId, room_ids: &[String]) {
        let mut registry = self.write();
        for room_id in room_ids {
            registry.join(conn, room_id);
        }
    }

    pub fn leave(&self, conn: ConnId, room_id: &str) -> bool {
        self.write().leave(conn, room_id)
    }

    pub fn has_joined(&self, conn: ConnId, room_id: &str) -> bool {
        self.read()
            .connections
            .get(&conn)
            .is_some_and(|connection| connection.state.has_joined(room_id))
    }

    pub fn connection_state(&self, conn: ConnId) -> Option<ConnectionState> {
        self.read().connections.get(&conn).map(|connection| connection.state.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        !self.read().user_connections(user_id).is_empty()
    }

    /// Delivers to every subscriber of the channel except `skip`. Returns
    /// how many connections accepted the event.
    pub fn publish(&self, channel: &Channel, event: ServerEvent, skip: Option<ConnId>) -> usize {
        let event = Arc::new(event);
        let registry = self.read();
        let Some(subscribers) = registry.channels.get(channel) else {
            return 0;
        };

        let delivered = subscribers
            .iter()
            .filter(|conn| Some(**conn) != skip)
            .filter_map(|conn| registry.connections.get(conn))
            .filter(|connection| connection.outbox.send(event.clone()).is_ok())
            .count();

        tracing::debug!(%channel, delivered, "event published");
        delivered
    }

    /// Relays a client-originated event to a room the connection has joined,
    /// never echoing it back to the sender.
    pub fn relay(&self, conn: ConnId, room_id: &str, event: ServerEvent) -> usize {
        if !self.has_joined(conn, room_id) {
            return 0;
        }
        self.publish(&Channel::Room(room_id.to_owned()), event, Some(conn))
    }
}

impl EventSink for Hub {
    fn to_room(&self, room_id: &str, event: ServerEvent) {
        self.publish(&Channel::Room(room_id.to_owned()), event, None);
    }

    fn to_user(&self, user_id: &str, event: ServerEvent) {
        self.publish(&Channel::User(user_id.to_owned()), event, None);
    }

    fn to_everyone(&self, event: ServerEvent) {
        let event = Arc::new(event);
        for connection in self.read().connections.values() {
            let _ = connection.outbox.send(event.clone());
        }
    }

    fn attach_user(&self, user_id: &str, room_id: &str) {
        let mut registry = self.write();
        for conn in registry.user_connections(user_id) {
            registry.join(conn, room_id);
        }
    }

    fn detach_user(&self, user_id: &str, room_id: &str) {
        let mut registry = self.write();
        for conn in registry.user_connections(user_id) {
            registry.leave(conn, room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &Hub, user_id: &str) -> (ConnId, bool, mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn, first) = hub.register(user_id, tx);
        (conn, first, rx)
    }

    fn typing(room_id: &str, user_id: &str) -> ServerEvent {
        ServerEvent::UserTyping { room_id: room_id.into(), user_id: user_id.into() }
    }

    #[test]
    fn room_events_reach_only_subscribers() {
        let hub = Hub::new();
        let (a, _, mut rx_a) = connect(&hub, "a");
        let (_b, _, mut rx_b) = connect(&hub, "b");
        hub.join_all(a, &["r1".to_owned()]);

        hub.to_room("r1", typing("r1", "x"));

        assert_eq!(*rx_a.try_recv().unwrap(), typing("r1", "x"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn relay_skips_sender_and_requires_join() {
        let hub = Hub::new();
        let (a, _, mut rx_a) = connect(&hub, "a");
        let (b, _, mut rx_b) = connect(&hub, "b");
        let (c, _, _rx_c) = connect(&hub, "c");
        hub.join(a, "r1");
        hub.join(b, "r1");

        assert_eq!(hub.relay(a, "r1", typing("r1", "a")), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(*rx_b.try_recv().unwrap(), typing("r1", "a"));

        assert_eq!(hub.relay(c, "r1", typing("r1", "c")), 0);
    }

    #[test]
    fn presence_counts_connections_per_user() {
        let hub = Hub::new();
        let (first, is_first, _rx1) = connect(&hub, "a");
        let (second, is_second_first, _rx2) = connect(&hub, "a");
        assert!(is_first);
        assert!(!is_second_first);

        assert_eq!(hub.unregister(first), Some(("a".to_owned(), false)));
        assert!(hub.is_online("a"));
        assert_eq!(hub.unregister(second), Some(("a".to_owned(), true)));
        assert!(!hub.is_online("a"));
        assert_eq!(hub.unregister(second), None);
    }

    #[test]
    fn attach_and_detach_follow_every_connection_of_the_user() {
        let hub = Hub::new();
        let (one, _, _rx1) = connect(&hub, "a");
        let (two, _, _rx2) = connect(&hub, "a");

        hub.attach_user("a", "r1");
        assert!(hub.has_joined(one, "r1"));
        assert!(hub.has_joined(two, "r1"));

        hub.detach_user("a", "r1");
        assert!(!hub.has_joined(one, "r1"));
        assert!(matches!(hub.connection_state(two), Some(ConnectionState::Authenticated { .. })));
    }

    #[test]
    fn unregister_clears_room_channels() {
        let hub = Hub::new();
        let (a, _, _rx) = connect(&hub, "a");
        hub.join(a, "r1");
        hub.unregister(a);

        assert_eq!(hub.publish(&Channel::Room("r1".into()), typing("r1", "x"), None), 0);
    }

    #[test]
    fn frames_use_event_and_data_keys() {
        let json = serde_json::to_value(ServerEvent::RoomDeleted {
            room_id: "r1".into(),
            deleted_by: "a".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({
            "event": "room_deleted",
            "data": { "roomId": "r1", "deletedBy": "a" },
        }));

        let parsed: ClientEvent =
            serde_json::from_str(r#"{"event":"typing_start","data":"r1"}"#).unwrap();
        assert_eq!(parsed, ClientEvent::TypingStart("r1".into()));
        assert_eq!(Channel::User("a".into()).to_string(), "user:a");
    }
}
