use serde::{Deserialize, Serialize};

use crate::{
    chat::{unread_count, ReadReceiptTracker},
    db::{Member, MessageView, Repository, Role, Room},
    guard, AppError, AppResult,
};

const DEFAULT_PAGE: i64 = 30;
const MAX_PAGE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub display_name: String,
    pub is_group: bool,
    pub is_private: bool,
    pub image_url: Option<String>,
    pub member_count: usize,
    pub unread_count: i64,
    pub last_message: Option<MessageView>,
    pub last_activity_at: i64,
    pub deleted_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetail {
    #[serde(flatten)]
    pub summary: RoomSummary,
    pub created_by: String,
    pub created_at: i64,
    pub members: Vec<Member>,
    pub pending_requests: Vec<Member>,
    pub my_role: Option<Role>,
    pub is_member: bool,
}

/// Cursor for paging backwards through a room. `before_id` breaks ties
/// between messages sharing the `before_at` millisecond.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub before_at: Option<i64>,
    pub before_id: Option<String>,
    pub limit: Option<i64>,
}

/// How a room is called for one viewer. A 1:1 room has no stored name: it
/// takes the other member's name.
pub fn display_name(room: &Room, members: &[Member], viewer_id: &str) -> String {
    if room.is_group {
        return room.name.clone().unwrap_or_default();
    }
    members
        .iter()
        .find(|member| member.user_id != viewer_id)
        .map(|member| member.name.clone())
        .or_else(|| room.name.clone())
        .unwrap_or_else(|| "Unknown user".to_owned())
}

/// Read-side projections, computed from the membership, message and receipt
/// tables on every call.
#[derive(Clone)]
pub struct RoomDirectory {
    repo: Repository,
    receipts: ReadReceiptTracker,
}

impl RoomDirectory {
    pub fn new(repo: Repository, receipts: ReadReceiptTracker) -> Self {
        Self { repo, receipts }
    }

    async fn summarize(&self, room: &Room, viewer_id: &str, until: i64, with_unread: bool) -> AppResult<RoomSummary> {
        let members = self.repo.members(&room.id).await?;
        let last_message = self.repo.last_message(&room.id, until).await?;
        let unread_count = if with_unread {
            unread_count(&self.repo, &room.id, viewer_id).await?
        } else {
            0
        };

        Ok(RoomSummary {
            id: room.id.clone(),
            display_name: display_name(room, &members, viewer_id),
            is_group: room.is_group,
            is_private: room.is_private,
            image_url: room.image_url.clone(),
            member_count: members.len(),
            unread_count,
            last_activity_at: last_message.as_ref().map_or(room.created_at, |m| m.created_at),
            last_message,
            deleted_at: room.deleted_at,
        })
    }

    pub async fn active_rooms(&self, user_id: &str) -> AppResult<Vec<RoomSummary>> {
        let mut summaries = Vec::new();
        for room_id in self.repo.active_room_ids(user_id).await? {
            let Some(room) = self.repo.get_room(&room_id).await? else {
                continue;
            };
            if room.is_archived() {
                continue;
            }
            summaries.push(self.summarize(&room, user_id, i64::MAX, true).await?);
        }

        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(summaries)
    }

    pub async fn deactivated_rooms(&self, user_id: &str) -> AppResult<Vec<RoomSummary>> {
        let mut summaries = Vec::new();
        for room in self.repo.deactivated_rooms(user_id).await? {
            let until = self.visible_until(&room.id, user_id).await?;
            summaries.push(self.summarize(&room, user_id, until, false).await?);
        }
        Ok(summaries)
    }

    pub async fn room_detail(&self, room_id: &str, user_id: &str) -> AppResult<RoomDetail> {
        let room = guard::load_room(&self.repo, room_id).await?;
        let membership = self
            .repo
            .latest_membership(room_id, user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden(format!("user {user_id} never belonged to room {room_id}")))?;

        let is_member = membership.is_current();
        let until = if is_member { i64::MAX } else { membership.leave_at.unwrap_or(i64::MAX) };
        let summary = self.summarize(&room, user_id, until, is_member).await?;

        let is_admin = is_member && membership.role == Role::Admin;
        let pending_requests = if is_admin {
            self.repo.pending_requests(room_id).await?
        } else {
            Vec::new()
        };

        Ok(RoomDetail {
            summary,
            created_by: room.created_by,
            created_at: room.created_at,
            members: self.repo.members(room_id).await?,
            pending_requests,
            my_role: is_member.then_some(membership.role),
            is_member,
        })
    }

    /// A page of messages older than the cursor, oldest first. Former
    /// members only see what was sent while they belonged. Active members
    /// get the returned page marked as read.
    pub async fn messages(&self, room_id: &str, user_id: &str, page: &PageQuery) -> AppResult<Vec<MessageView>> {
        guard::load_room(&self.repo, room_id).await?;
        let membership = self
            .repo
            .latest_membership(room_id, user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden(format!("user {user_id} never belonged to room {room_id}")))?;

        let until = if membership.is_current() {
            i64::MAX
        } else {
            membership.leave_at.unwrap_or(i64::MAX)
        };
        let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let before_at = page.before_at.unwrap_or(i64::MAX);

        let mut messages = self
            .repo
            .messages_page(room_id, before_at, page.before_id.as_deref(), until, limit)
            .await?;
        messages.reverse();

        if membership.is_current() {
            let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
            if let Err(err) = self.receipts.record(room_id, &ids, user_id).await {
                tracing::warn!(%err, room_id, user_id, "could not mark fetched page as read");
            }
        }

        Ok(messages)
    }

    async fn visible_until(&self, room_id: &str, user_id: &str) -> AppResult<i64> {
        Ok(self
            .repo
            .latest_membership(room_id, user_id)
            .await?
            .and_then(|m| m.leave_at)
            .unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(is_group: bool, name: Option<&str>) -> Room {
        Room {
            id: "r".into(),
            name: name.map(Into::into),
            is_group,
            is_private: false,
            image_url: None,
            created_by: "a".into(),
            created_at: 0,
            deleted_at: None,
        }
    }

    fn member(id: &str, name: &str) -> Member {
        Member {
            user_id: id.into(),
            name: name.into(),
            image_url: None,
            is_online: false,
            role: Role::Personal,
            joined_at: 0,
        }
    }

    #[test]
    fn personal_room_is_named_after_the_other_member() {
        let members = [member("a", "Ann"), member("b", "Bob")];
        assert_eq!(display_name(&room(false, None), &members, "a"), "Bob");
        assert_eq!(display_name(&room(false, None), &members, "b"), "Ann");
    }

    #[test]
    fn self_chat_and_groups_use_the_stored_name() {
        assert_eq!(display_name(&room(false, Some("Me")), &[member("a", "Ann")], "a"), "Me");
        let members = [member("a", "Ann"), member("b", "Bob")];
        assert_eq!(display_name(&room(true, Some("Team")), &members, "a"), "Team");
    }
}
