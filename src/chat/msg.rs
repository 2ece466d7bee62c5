use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{now_millis, Message, MessageType, MessageView, Repository},
    guard,
    hub::{EventSink, ServerEvent},
    AppError, AppResult,
};

/// Text an unsent message is overwritten with.
pub const UNSENT_TEXT: &str = "This message was unsent";

const ROOM_SEARCH_LIMIT: i64 = 100;
const GLOBAL_SEARCH_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct MessageService {
    repo: Repository,
    sink: Arc<dyn EventSink>,
}

impl MessageService {
    pub fn new(repo: Repository, sink: Arc<dyn EventSink>) -> Self {
        Self { repo, sink }
    }

    pub async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> AppResult<MessageView> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("message text must not be empty".to_owned()));
        }

        guard::writable_room(&self.repo, room_id).await?;
        guard::require_member(&self.repo, room_id, sender_id).await?;

        if let Some(reply_to) = reply_to {
            if self.repo.message_in_room(room_id, reply_to).await?.is_none() {
                return Err(AppError::Validation(format!(
                    "reply target {reply_to} is not a message of room {room_id}"
                )));
            }
        }

        self.persist(room_id, sender_id, text, MessageType::User, reply_to).await
    }

    /// Announces a lifecycle event. Never fails the caller: a notification
    /// that could not be stored is logged and reported as `false`.
    pub async fn send_system_message(&self, room_id: &str, text: &str, actor_id: &str) -> bool {
        match self.persist(room_id, actor_id, text, MessageType::System, None).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(%err, room_id, text, "system message dropped");
                false
            }
        }
    }

    async fn persist(
        &self,
        room_id: &str,
        sender_id: &str,
        text: &str,
        kind: MessageType,
        reply_to: Option<&str>,
    ) -> AppResult<MessageView> {
        let message = Message {
            id: Uuid::now_v7().to_string(),
            room_id: room_id.to_owned(),
            sender_id: sender_id.to_owned(),
            text: text.to_owned(),
            kind,
            reply_to_id: reply_to.map(str::to_owned),
            created_at: now_millis(),
        };
        self.repo.insert_message(&message).await?;

        let view = self
            .repo
            .message_view(&message.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {} not found", message.id)))?;

        self.sink.to_room(room_id, ServerEvent::NewMessage(view.clone()));
        Ok(view)
    }

    /// Redacts the text in place; id, room and timestamp never change.
    pub async fn unsend_message(&self, room_id: &str, message_id: &str, user_id: &str) -> AppResult<()> {
        guard::writable_room(&self.repo, room_id).await?;

        let message = self
            .repo
            .message_in_room(room_id, message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {message_id} not found in room {room_id}")))?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden("only the sender can unsend a message".to_owned()));
        }
        if message.kind == MessageType::System {
            return Err(AppError::Forbidden("system messages cannot be unsent".to_owned()));
        }

        if self.repo.redact_message(message_id, UNSENT_TEXT).await? {
            tracing::info!(room_id, message_id, "message unsent");
            self.sink.to_room(room_id, ServerEvent::MessageUnsent {
                room_id: room_id.to_owned(),
                message_id: message_id.to_owned(),
                text: UNSENT_TEXT.to_owned(),
            });
        }

        Ok(())
    }

    pub async fn search_messages(&self, room_id: &str, query: &str, user_id: &str) -> AppResult<Vec<MessageView>> {
        let query = search_query(query)?;
        guard::load_room(&self.repo, room_id).await?;
        guard::require_member(&self.repo, room_id, user_id).await?;

        Ok(self.repo.search_room(room_id, query, UNSENT_TEXT, ROOM_SEARCH_LIMIT).await?)
    }

    pub async fn search_global_messages(&self, query: &str, user_id: &str) -> AppResult<Vec<MessageView>> {
        let query = search_query(query)?;
        Ok(self
            .repo
            .search_member_rooms(user_id, query, UNSENT_TEXT, GLOBAL_SEARCH_LIMIT)
            .await?)
    }
}

fn search_query(query: &str) -> AppResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::Validation("search query must not be empty".to_owned()));
    }
    Ok(query)
}
