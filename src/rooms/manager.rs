use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    chat::MessageService,
    db::{now_millis, Repository, Role, Room},
    guard,
    hub::{EventSink, ServerEvent},
    AppError, AppResult,
};

const SELF_CHAT_NAME: &str = "Me";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub group_name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub group_members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: String,
    /// False when an existing personal chat was returned instead.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinOutcome {
    Joined,
    Pending,
}

/// Owns every room and membership state transition.
#[derive(Clone)]
pub struct MembershipManager {
    repo: Repository,
    sink: Arc<dyn EventSink>,
    chat: MessageService,
}

impl MembershipManager {
    pub fn new(repo: Repository, sink: Arc<dyn EventSink>, chat: MessageService) -> Self {
        Self { repo, sink, chat }
    }

    pub async fn create_room(&self, creator_id: &str, request: NewRoom) -> AppResult<RoomRef> {
        let mut members = vec![creator_id.to_owned()];
        for id in request.group_members.iter().map(|id| id.trim()) {
            if !id.is_empty() && !members.iter().any(|m| m == id) {
                members.push(id.to_owned());
            }
        }

        let missing = self.repo.missing_users(&members).await?;
        if !missing.is_empty() {
            return Err(AppError::NotFound(format!("users not found: {}", missing.join(", "))));
        }

        let group_name = request.group_name.as_deref().map(str::trim).filter(|name| !name.is_empty());

        let (name, is_group, is_private) = match members.len() {
            1 => {
                if let Some(room_id) = self.find_self_chat(creator_id).await? {
                    return Ok(RoomRef { room_id, created: false });
                }
                (Some(SELF_CHAT_NAME.to_owned()), false, false)
            }
            2 if !request.is_group => {
                if let Some(room_id) = self.find_personal_chat(&members[0], &members[1]).await? {
                    return Ok(RoomRef { room_id, created: false });
                }
                (None, false, false)
            }
            // a two-person group only exists as a private group
            2 => (Some(require_group_name(group_name)?), true, true),
            _ => (Some(require_group_name(group_name)?), true, request.is_private),
        };

        let room = Room {
            id: Uuid::now_v7().to_string(),
            name,
            is_group,
            is_private,
            image_url: None,
            created_by: creator_id.to_owned(),
            created_at: now_millis(),
            deleted_at: None,
        };

        let roles: Vec<(String, Role)> = members
            .iter()
            .map(|id| {
                let role = match (is_group, id == creator_id) {
                    (false, _) => Role::Personal,
                    (true, true) => Role::Admin,
                    (true, false) => Role::Member,
                };
                (id.clone(), role)
            })
            .collect();

        self.repo.create_room(&room, &roles).await?;
        tracing::info!(room_id = %room.id, is_group, members = members.len(), "room created");

        if let (true, Some(name)) = (is_group, room.name.as_deref()) {
            self.chat
                .send_system_message(&room.id, &format!("Group \"{name}\" created"), creator_id)
                .await;
        }

        for member in &members {
            self.sink.attach_user(member, &room.id);
            self.sink.to_user(member, ServerEvent::NewRoomCreated {
                room_id: room.id.clone(),
                name: room.name.clone(),
                is_group,
                added_by: creator_id.to_owned(),
            });
        }

        Ok(RoomRef { room_id: room.id, created: true })
    }

    /// Personal-chat dedup: intersect the active rooms of both users and keep
    /// the unnamed non-group room with exactly two active members. A linear
    /// scan over each user's room list.
    async fn find_personal_chat(&self, a: &str, b: &str) -> AppResult<Option<String>> {
        let b_rooms: HashSet<String> = self.repo.active_room_ids(b).await?.into_iter().collect();

        for room_id in self.repo.active_room_ids(a).await? {
            if !b_rooms.contains(&room_id) {
                continue;
            }
            if let Some(room) = self.personal_room_of_size(&room_id, 2).await? {
                if room.name.is_none() {
                    return Ok(Some(room.id));
                }
            }
        }
        Ok(None)
    }

    /// A 1:1 chat the peer has left also has one active member, so only a
    /// room the user created as "Me" counts.
    async fn find_self_chat(&self, user_id: &str) -> AppResult<Option<String>> {
        for room_id in self.repo.active_room_ids(user_id).await? {
            let Some(room) = self.personal_room_of_size(&room_id, 1).await? else {
                continue;
            };
            if room.created_by == user_id && room.name.as_deref() == Some(SELF_CHAT_NAME) {
                return Ok(Some(room.id));
            }
        }
        Ok(None)
    }

    async fn personal_room_of_size(&self, room_id: &str, size: i64) -> AppResult<Option<Room>> {
        let Some(room) = self.repo.get_room(room_id).await? else {
            return Ok(None);
        };
        if room.is_group || room.is_archived() {
            return Ok(None);
        }
        if self.repo.active_member_count(room_id).await? != size {
            return Ok(None);
        }
        Ok(Some(room))
    }

    pub async fn join_room(&self, room_id: &str, user_id: &str) -> AppResult<JoinOutcome> {
        let room = guard::load_room(&self.repo, room_id).await?;
        if !room.is_group {
            return Err(AppError::InvalidOperation("personal chats cannot be joined".to_owned()));
        }
        if room.is_archived() {
            return Err(AppError::ArchivedRoom(room.id));
        }

        if let Some(existing) = self.repo.active_membership(room_id, user_id).await? {
            return Err(AppError::Conflict(if existing.join_approved {
                format!("user {user_id} is already a member of room {room_id}")
            } else {
                format!("user {user_id} already requested to join room {room_id}")
            }));
        }

        let approved = !room.is_private;
        if !self
            .repo
            .insert_membership(room_id, user_id, Role::Member, approved, None, now_millis())
            .await?
        {
            return Err(AppError::Conflict(format!("user {user_id} is already in room {room_id}")));
        }

        let user_name = self.repo.user_name(user_id).await?;

        if !approved {
            tracing::info!(room_id, user_id, "join request pending");
            for admin_id in self.repo.admin_ids(room_id).await? {
                self.sink.to_user(&admin_id, ServerEvent::JoinRequested {
                    room_id: room_id.to_owned(),
                    user_id: user_id.to_owned(),
                    user_name: user_name.clone(),
                });
            }
            return Ok(JoinOutcome::Pending);
        }

        self.welcome(&room, user_id, &user_name, user_id).await;
        Ok(JoinOutcome::Joined)
    }

    pub async fn approve_join_request(&self, room_id: &str, requester_id: &str, admin_id: &str) -> AppResult<()> {
        let room = self.admin_precondition(room_id, admin_id).await?;

        if !self.repo.approve_membership(room_id, requester_id).await? {
            return Err(AppError::NotFound(format!(
                "no pending join request from user {requester_id} in room {room_id}"
            )));
        }

        let user_name = self.repo.user_name(requester_id).await?;
        self.welcome(&room, requester_id, &user_name, admin_id).await;
        Ok(())
    }

    /// A rejected request never became a membership, so its row is deleted
    /// outright rather than closed with a leave time.
    pub async fn reject_join_request(&self, room_id: &str, requester_id: &str, admin_id: &str) -> AppResult<()> {
        self.admin_precondition(room_id, admin_id).await?;

        if !self.repo.delete_pending_membership(room_id, requester_id).await? {
            return Err(AppError::NotFound(format!(
                "no pending join request from user {requester_id} in room {room_id}"
            )));
        }

        tracing::info!(room_id, requester_id, admin_id, "join request rejected");
        Ok(())
    }

    async fn welcome(&self, room: &Room, user_id: &str, user_name: &str, actor_id: &str) {
        self.chat
            .send_system_message(&room.id, &format!("{user_name} joined the group"), actor_id)
            .await;
        self.sink.attach_user(user_id, &room.id);
        self.sink.to_user(user_id, ServerEvent::NewRoomCreated {
            room_id: room.id.clone(),
            name: room.name.clone(),
            is_group: room.is_group,
            added_by: actor_id.to_owned(),
        });
        self.sink.to_room(&room.id, ServerEvent::MemberAdded {
            room_id: room.id.clone(),
            user_ids: vec![user_id.to_owned()],
            added_by: actor_id.to_owned(),
        });
    }

    pub async fn leave_room(&self, room_id: &str, user_id: &str) -> AppResult<()> {
        let room = guard::writable_room(&self.repo, room_id).await?;

        if !self.repo.end_membership(room_id, user_id, now_millis()).await? {
            return Err(AppError::Conflict(format!("user {user_id} is not an active member of room {room_id}")));
        }

        let user_name = self.repo.user_name(user_id).await?;
        let text = if room.is_group {
            format!("{user_name} left the group")
        } else {
            format!("{user_name} left the chat")
        };
        self.chat.send_system_message(room_id, &text, user_id).await;

        self.sink.to_room(room_id, ServerEvent::MemberLeft {
            room_id: room_id.to_owned(),
            user_ids: vec![user_id.to_owned()],
            removed_by: None,
        });
        self.sink.detach_user(user_id, room_id);
        Ok(())
    }

    pub async fn add_members(&self, room_id: &str, actor_id: &str, target_ids: &[String]) -> AppResult<()> {
        let targets = distinct(target_ids)?;
        self.admin_precondition(room_id, actor_id).await?;

        let missing = self.repo.missing_users(&targets).await?;
        if !missing.is_empty() {
            return Err(AppError::NotFound(format!("users not found: {}", missing.join(", "))));
        }

        let mut already = Vec::new();
        for target in &targets {
            if self.repo.active_membership(room_id, target).await?.is_some() {
                already.push(target.clone());
            }
        }
        if !already.is_empty() {
            return Err(AppError::Conflict(format!("already in room {room_id}: {}", already.join(", "))));
        }

        if !self.repo.insert_memberships(room_id, &targets, actor_id, now_millis()).await? {
            return Err(AppError::Conflict(format!("a member was added to room {room_id} concurrently")));
        }

        let room = guard::load_room(&self.repo, room_id).await?;
        let actor_name = self.repo.user_name(actor_id).await?;
        let names = self.names(&targets).await?;
        self.chat
            .send_system_message(room_id, &format!("{actor_name} added {names}"), actor_id)
            .await;

        for target in &targets {
            self.sink.attach_user(target, room_id);
            self.sink.to_user(target, ServerEvent::NewRoomCreated {
                room_id: room_id.to_owned(),
                name: room.name.clone(),
                is_group: room.is_group,
                added_by: actor_id.to_owned(),
            });
        }
        self.sink.to_room(room_id, ServerEvent::MemberAdded {
            room_id: room_id.to_owned(),
            user_ids: targets,
            added_by: actor_id.to_owned(),
        });
        Ok(())
    }

    pub async fn remove_members(&self, room_id: &str, actor_id: &str, target_ids: &[String]) -> AppResult<()> {
        let targets = distinct(target_ids)?;
        if targets.iter().any(|target| target == actor_id) {
            return Err(AppError::Forbidden("leave the room instead of removing yourself".to_owned()));
        }
        self.admin_precondition(room_id, actor_id).await?;

        let mut inactive = Vec::new();
        for target in &targets {
            let current = self.repo.active_membership(room_id, target).await?;
            if !current.is_some_and(|m| m.is_current()) {
                inactive.push(target.clone());
            }
        }
        if !inactive.is_empty() {
            return Err(AppError::Conflict(format!("not members of room {room_id}: {}", inactive.join(", "))));
        }

        if !self.repo.end_memberships(room_id, &targets, actor_id, now_millis()).await? {
            return Err(AppError::Conflict(format!("a member left room {room_id} concurrently")));
        }

        let actor_name = self.repo.user_name(actor_id).await?;
        let names = self.names(&targets).await?;
        self.chat
            .send_system_message(room_id, &format!("{actor_name} removed {names}"), actor_id)
            .await;

        self.sink.to_room(room_id, ServerEvent::MemberLeft {
            room_id: room_id.to_owned(),
            user_ids: targets.clone(),
            removed_by: Some(actor_id.to_owned()),
        });
        for target in &targets {
            self.sink.detach_user(target, room_id);
        }
        Ok(())
    }

    pub async fn promote_to_admin(&self, room_id: &str, actor_id: &str, target_id: &str) -> AppResult<()> {
        self.change_role(room_id, actor_id, target_id, Role::Member, Role::Admin).await
    }

    pub async fn demote_from_admin(&self, room_id: &str, actor_id: &str, target_id: &str) -> AppResult<()> {
        self.change_role(room_id, actor_id, target_id, Role::Admin, Role::Member).await
    }

    async fn change_role(&self, room_id: &str, actor_id: &str, target_id: &str, from: Role, to: Role) -> AppResult<()> {
        self.admin_precondition(room_id, actor_id).await?;

        let target = self
            .repo
            .active_membership(room_id, target_id)
            .await?
            .filter(|m| m.is_current())
            .ok_or_else(|| AppError::NotFound(format!("user {target_id} is not a member of room {room_id}")))?;

        if target.role != from || !self.repo.change_role(room_id, target_id, from, to).await? {
            return Err(AppError::Conflict(match to {
                Role::Admin => format!("user {target_id} is already an admin"),
                _ => format!("user {target_id} is not an admin"),
            }));
        }

        tracing::info!(room_id, target_id, ?to, "member role changed");
        self.sink.to_room(room_id, ServerEvent::MemberRoleChanged {
            room_id: room_id.to_owned(),
            user_id: target_id.to_owned(),
            role: to,
            changed_by: actor_id.to_owned(),
        });
        Ok(())
    }

    /// Archives the room. It stays readable but refuses every later write.
    pub async fn delete_room(&self, room_id: &str, actor_id: &str) -> AppResult<()> {
        self.admin_precondition(room_id, actor_id).await?;

        if !self.repo.archive_room(room_id, now_millis()).await? {
            return Err(AppError::ArchivedRoom(room_id.to_owned()));
        }

        tracing::info!(room_id, actor_id, "room archived");
        self.sink.to_room(room_id, ServerEvent::RoomDeleted {
            room_id: room_id.to_owned(),
            deleted_by: actor_id.to_owned(),
        });
        Ok(())
    }

    pub async fn set_room_image(&self, room_id: &str, actor_id: &str, image_url: &str) -> AppResult<()> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(AppError::Validation("image url must not be empty".to_owned()));
        }
        self.admin_precondition(room_id, actor_id).await?;

        if !self.repo.set_room_image(room_id, image_url).await? {
            return Err(AppError::ArchivedRoom(room_id.to_owned()));
        }

        self.sink.to_room(room_id, ServerEvent::RoomUpdated {
            room_id: room_id.to_owned(),
            image_url: Some(image_url.to_owned()),
        });
        Ok(())
    }

    /// Group rooms only, not archived, actor is a current admin.
    async fn admin_precondition(&self, room_id: &str, actor_id: &str) -> AppResult<Room> {
        let room = guard::writable_room(&self.repo, room_id).await?;
        guard::require_group(&room)?;
        guard::require_admin(&self.repo, room_id, actor_id).await?;
        Ok(room)
    }

    async fn names(&self, user_ids: &[String]) -> AppResult<String> {
        let mut names = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            names.push(self.repo.user_name(id).await?);
        }
        Ok(names.join(", "))
    }
}

fn require_group_name(name: Option<&str>) -> AppResult<String> {
    name.map(str::to_owned)
        .ok_or_else(|| AppError::Validation("a group name is required for group rooms".to_owned()))
}

fn distinct(ids: &[String]) -> AppResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids.iter().map(|id| id.trim()) {
        if !id.is_empty() && !out.iter().any(|seen| seen == id) {
            out.push(id.to_owned());
        }
    }
    if out.is_empty() {
        return Err(AppError::Validation("no members given".to_owned()));
    }
    Ok(out)
}
