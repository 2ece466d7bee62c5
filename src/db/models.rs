use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    Personal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub is_online: bool,
    pub last_seen_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub is_private: bool,
    pub image_url: Option<String>,
    pub created_by: String,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl Room {
    pub fn is_archived(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: i64,
    pub room_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: i64,
    pub leave_at: Option<i64>,
    pub join_approved: bool,
    pub added_by: Option<String>,
    pub removed_by: Option<String>,
}

impl Membership {
    /// Active and past any approval gate.
    pub fn is_current(&self) -> bool {
        self.leave_at.is_none() && self.join_approved
    }
}

/// A membership joined with the member's profile.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub is_online: bool,
    pub role: Role,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub text: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub reply_to_id: Option<String>,
    pub created_at: i64,
}

/// A message as clients see it: sender name and the immediate reply parent
/// denormalized, never the parent's own parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub text: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub reply_to_id: Option<String>,
    pub reply_text: Option<String>,
    pub reply_sender_name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: String,
    pub user_id: String,
    pub read_at: i64,
}
