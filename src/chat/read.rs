use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::{
    db::{now_millis, Repository},
    guard,
    hub::{EventSink, ServerEvent},
    AppError, AppResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    /// Receipts this call created; zero when everything was already read.
    pub newly_read: u64,
    /// Every message of the room the reader has read so far.
    pub message_ids: Vec<String>,
}

#[derive(Clone)]
pub struct ReadReceiptTracker {
    repo: Repository,
    sink: Arc<dyn EventSink>,
}

impl ReadReceiptTracker {
    pub fn new(repo: Repository, sink: Arc<dyn EventSink>) -> Self {
        Self { repo, sink }
    }

    pub async fn mark_messages_as_read(
        &self,
        room_id: &str,
        message_ids: &[String],
        user_id: &str,
    ) -> AppResult<ReadOutcome> {
        // archived rooms stay markable
        guard::load_room(&self.repo, room_id).await?;
        guard::require_member(&self.repo, room_id, user_id).await?;

        let mut seen = HashSet::new();
        let requested: Vec<String> = message_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();

        let existing = self.repo.existing_message_ids(room_id, &requested).await?;
        if existing.len() != requested.len() {
            let unknown: Vec<_> = requested.iter().filter(|id| !existing.contains(*id)).cloned().collect();
            return Err(AppError::NotFound(format!(
                "messages not found in room {room_id}: {}",
                unknown.join(", ")
            )));
        }

        self.record(room_id, &existing, user_id).await
    }

    pub async fn mark_all_as_read(&self, room_id: &str, user_id: &str) -> AppResult<ReadOutcome> {
        guard::load_room(&self.repo, room_id).await?;
        guard::require_member(&self.repo, room_id, user_id).await?;

        let ids = self.repo.room_message_ids(room_id, i64::MAX).await?;
        self.record(room_id, &ids, user_id).await
    }

    /// Stores receipts for messages already known to belong to the room and
    /// tells the room, but only when something changed.
    pub(crate) async fn record(&self, room_id: &str, message_ids: &[String], user_id: &str) -> AppResult<ReadOutcome> {
        let newly_read = if message_ids.is_empty() {
            0
        } else {
            self.repo.insert_receipts(user_id, message_ids, now_millis()).await?
        };
        let read_ids = self.repo.read_message_ids(room_id, user_id).await?;

        if newly_read > 0 {
            let reader_name = self.repo.user_name(user_id).await?;
            self.sink.to_room(room_id, ServerEvent::MessagesReadUpdate {
                room_id: room_id.to_owned(),
                reader_id: user_id.to_owned(),
                reader_name,
                message_ids: read_ids.clone(),
            });
        }

        Ok(ReadOutcome { newly_read, message_ids: read_ids })
    }

    pub async fn count_unread_messages(&self, room_id: &str, user_id: &str) -> AppResult<i64> {
        guard::load_room(&self.repo, room_id).await?;
        guard::require_member(&self.repo, room_id, user_id).await?;

        Ok(unread_count(&self.repo, room_id, user_id).await?)
    }
}

/// Messages of the room the user holds no receipt for. With no receipts at
/// all this is simply the room's message count.
pub(crate) async fn unread_count(repo: &Repository, room_id: &str, user_id: &str) -> Result<i64, sqlx::Error> {
    if repo.receipt_count(room_id, user_id).await? == 0 {
        return repo.message_count(room_id).await;
    }
    repo.count_without_receipt(room_id, user_id).await
}
