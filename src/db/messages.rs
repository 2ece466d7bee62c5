use super::{Message, MessageView, ReadReceipt, Repository};

const VIEW_SELECT: &str = "SELECT m.id, m.room_id, m.sender_id, u.name AS sender_name, m.text, m.type,
        m.reply_to_id, p.text AS reply_text, pu.name AS reply_sender_name, m.created_at
    FROM message m
    LEFT JOIN users u ON u.id = m.sender_id
    LEFT JOIN message p ON p.id = m.reply_to_id
    LEFT JOIN users pu ON pu.id = p.sender_id";

impl Repository {
    pub async fn insert_message(&self, message: &Message) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO message (id, room_id, sender_id, text, type, reply_to_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.room_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(message.kind)
        .bind(&message.reply_to_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO read_receipt (message_id, user_id, read_at) VALUES (?, ?, ?)
             ON CONFLICT(message_id, user_id) DO NOTHING",
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    pub async fn message_in_room(&self, room_id: &str, id: &str) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM message WHERE id = ? AND room_id = ?")
            .bind(id)
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn message_view(&self, id: &str) -> Result<Option<MessageView>, sqlx::Error> {
        let sql = format!("{VIEW_SELECT} WHERE m.id = ?");
        sqlx::query_as::<_, MessageView>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn redact_message(&self, id: &str, text: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE message SET text = ?1 WHERE id = ?2 AND text <> ?1")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Newest-first page of messages older than the cursor and no later
    /// than `until`. The cursor is `(before, before_id)`; without an id,
    /// everything created in the `before` millisecond is excluded.
    pub async fn messages_page(
        &self,
        room_id: &str,
        before: i64,
        before_id: Option<&str>,
        until: i64,
        limit: i64,
    ) -> Result<Vec<MessageView>, sqlx::Error> {
        let sql = format!(
            "{VIEW_SELECT} WHERE m.room_id = ?1
                 AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
                 AND m.created_at <= ?4
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?5"
        );
        sqlx::query_as::<_, MessageView>(&sql)
            .bind(room_id)
            .bind(before)
            .bind(before_id)
            .bind(until)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn last_message(&self, room_id: &str, until: i64) -> Result<Option<MessageView>, sqlx::Error> {
        let sql = format!(
            "{VIEW_SELECT} WHERE m.room_id = ? AND m.created_at <= ?
             ORDER BY m.created_at DESC, m.id DESC LIMIT 1"
        );
        sqlx::query_as::<_, MessageView>(&sql)
            .bind(room_id)
            .bind(until)
            .fetch_optional(&self.pool)
            .await
    }

    /// Case-insensitive substring search over user messages of one room,
    /// skipping messages whose text is `redacted`.
    pub async fn search_room(
        &self,
        room_id: &str,
        query: &str,
        redacted: &str,
        limit: i64,
    ) -> Result<Vec<MessageView>, sqlx::Error> {
        let sql = format!(
            "{VIEW_SELECT} WHERE m.room_id = ? AND m.type = 'user' AND m.text <> ?
                 AND instr(lower(m.text), lower(?)) > 0
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?"
        );
        sqlx::query_as::<_, MessageView>(&sql)
            .bind(room_id)
            .bind(redacted)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    /// Same match as [`Repository::search_room`], across every room in
    /// which the user is an active, approved member.
    pub async fn search_member_rooms(
        &self,
        user_id: &str,
        query: &str,
        redacted: &str,
        limit: i64,
    ) -> Result<Vec<MessageView>, sqlx::Error> {
        let sql = format!(
            "{VIEW_SELECT}
             JOIN membership mb ON mb.room_id = m.room_id
                 AND mb.user_id = ? AND mb.leave_at IS NULL AND mb.join_approved = 1
             WHERE m.type = 'user' AND m.text <> ?
                 AND instr(lower(m.text), lower(?)) > 0
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?"
        );
        sqlx::query_as::<_, MessageView>(&sql)
            .bind(user_id)
            .bind(redacted)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn message_count(&self, room_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM message WHERE room_id = ?")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn room_message_ids(&self, room_id: &str, until: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM message WHERE room_id = ? AND created_at <= ? ORDER BY created_at, id",
        )
        .bind(room_id)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn existing_message_ids(&self, room_id: &str, ids: &[String]) -> Result<Vec<String>, sqlx::Error> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if self.message_in_room(room_id, id).await?.is_some() {
                found.push(id.clone());
            }
        }
        Ok(found)
    }

    pub async fn insert_receipts(&self, user_id: &str, message_ids: &[String], now: i64) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for message_id in message_ids {
            inserted += sqlx::query(
                "INSERT INTO read_receipt (message_id, user_id, read_at) VALUES (?, ?, ?)
                 ON CONFLICT(message_id, user_id) DO NOTHING",
            )
            .bind(message_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn read_message_ids(&self, room_id: &str, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.message_id FROM read_receipt r
             JOIN message m ON m.id = r.message_id
             WHERE m.room_id = ? AND r.user_id = ?
             ORDER BY m.created_at, m.id",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn receipt_count(&self, room_id: &str, user_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM read_receipt r
             JOIN message m ON m.id = r.message_id
             WHERE m.room_id = ? AND r.user_id = ?",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Messages of the room with no receipt from the user.
    pub async fn count_without_receipt(&self, room_id: &str, user_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM message
             WHERE room_id = ? AND id NOT IN (
                 SELECT message_id FROM read_receipt WHERE user_id = ?
             )",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn receipts_for(&self, message_id: &str) -> Result<Vec<ReadReceipt>, sqlx::Error> {
        sqlx::query_as::<_, ReadReceipt>("SELECT * FROM read_receipt WHERE message_id = ? ORDER BY read_at")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await
    }
}
