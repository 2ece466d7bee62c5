#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use roomchat::{
    chat::{MessageService, ReadReceiptTracker},
    db::{MessageView, Repository},
    hub::{EventSink, ServerEvent},
    rooms::{MembershipManager, NewRoom, RoomDirectory},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Room(String),
    User(String),
    Everyone,
}

/// Stands in for the hub: remembers what would have been fanned out.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Target, ServerEvent)>>,
    attachments: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(Target, ServerEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn to_room(&self, room_id: &str) -> Vec<ServerEvent> {
        self.filtered(Target::Room(room_id.to_owned()))
    }

    pub fn to_user(&self, user_id: &str) -> Vec<ServerEvent> {
        self.filtered(Target::User(user_id.to_owned()))
    }

    fn filtered(&self, target: Target) -> Vec<ServerEvent> {
        self.events()
            .into_iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, event)| event)
            .collect()
    }

    /// Wire names of the events sent to a room, in order.
    pub fn room_event_names(&self, room_id: &str) -> Vec<String> {
        self.to_room(room_id).iter().map(event_name).collect()
    }

    pub fn is_attached(&self, user_id: &str, room_id: &str) -> bool {
        self.attachments
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, r, _)| u == user_id && r == room_id)
            .is_some_and(|(_, _, attached)| *attached)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn to_room(&self, room_id: &str, event: ServerEvent) {
        self.events.lock().unwrap().push((Target::Room(room_id.to_owned()), event));
    }

    fn to_user(&self, user_id: &str, event: ServerEvent) {
        self.events.lock().unwrap().push((Target::User(user_id.to_owned()), event));
    }

    fn to_everyone(&self, event: ServerEvent) {
        self.events.lock().unwrap().push((Target::Everyone, event));
    }

    fn attach_user(&self, user_id: &str, room_id: &str) {
        self.attachments.lock().unwrap().push((user_id.to_owned(), room_id.to_owned(), true));
    }

    fn detach_user(&self, user_id: &str, room_id: &str) {
        self.attachments.lock().unwrap().push((user_id.to_owned(), room_id.to_owned(), false));
    }
}

pub fn event_name(event: &ServerEvent) -> String {
    serde_json::to_value(event).unwrap()["event"].as_str().unwrap().to_owned()
}

pub struct Harness {
    pub repo: Repository,
    pub sink: Arc<RecordingSink>,
    pub rooms: MembershipManager,
    pub chat: MessageService,
    pub receipts: ReadReceiptTracker,
    pub directory: RoomDirectory,
}

/// Fresh in-memory engine with users a (Ann), b (Bob), c (Cid) and d (Dee).
pub async fn harness() -> Harness {
    let repo = Repository::in_memory().await.unwrap();
    for (id, name) in [("a", "Ann"), ("b", "Bob"), ("c", "Cid"), ("d", "Dee")] {
        repo.upsert_user(id, name, None).await.unwrap();
    }

    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn EventSink> = sink.clone();
    let chat = MessageService::new(repo.clone(), dyn_sink.clone());
    let receipts = ReadReceiptTracker::new(repo.clone(), dyn_sink.clone());

    Harness {
        rooms: MembershipManager::new(repo.clone(), dyn_sink, chat.clone()),
        directory: RoomDirectory::new(repo.clone(), receipts.clone()),
        chat,
        receipts,
        repo,
        sink,
    }
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

pub fn group(name: &str, members: &[&str]) -> NewRoom {
    NewRoom {
        group_name: Some(name.to_owned()),
        is_group: true,
        is_private: false,
        group_members: ids(members),
    }
}

pub fn personal(members: &[&str]) -> NewRoom {
    NewRoom {
        group_members: ids(members),
        ..NewRoom::default()
    }
}

impl Harness {
    pub async fn group(&self, creator: &str, name: &str, members: &[&str]) -> String {
        self.rooms.create_room(creator, group(name, members)).await.unwrap().room_id
    }

    pub async fn private_group(&self, creator: &str, name: &str, members: &[&str]) -> String {
        let mut request = group(name, members);
        request.is_private = true;
        self.rooms.create_room(creator, request).await.unwrap().room_id
    }

    pub async fn all_messages(&self, room_id: &str) -> Vec<MessageView> {
        let mut page = self.repo.messages_page(room_id, i64::MAX, None, i64::MAX, 1000).await.unwrap();
        page.reverse();
        page
    }

    pub async fn membership_rows(&self, room_id: &str, user_id: &str) -> i64 {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM membership WHERE room_id = ? AND user_id = ?")
                .bind(room_id)
                .bind(user_id)
                .fetch_one(self.repo.pool())
                .await
                .unwrap();
        count
    }
}
