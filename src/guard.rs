use crate::{
    db::{Membership, Repository, Role, Room},
    AppError, AppResult,
};

pub async fn load_room(repo: &Repository, room_id: &str) -> AppResult<Room> {
    repo.get_room(room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {room_id} not found")))
}

pub async fn writable_room(repo: &Repository, room_id: &str) -> AppResult<Room> {
    let room = load_room(repo, room_id).await?;
    if room.is_archived() {
        return Err(AppError::ArchivedRoom(room.id));
    }
    Ok(room)
}

pub fn require_group(room: &Room) -> AppResult<()> {
    if !room.is_group {
        return Err(AppError::InvalidOperation(format!("room {} is not a group", room.id)));
    }
    Ok(())
}

pub async fn require_member(repo: &Repository, room_id: &str, user_id: &str) -> AppResult<Membership> {
    repo.active_membership(room_id, user_id)
        .await?
        .filter(Membership::is_current)
        .ok_or_else(|| AppError::Forbidden(format!("user {user_id} is not a member of room {room_id}")))
}

pub async fn require_admin(repo: &Repository, room_id: &str, user_id: &str) -> AppResult<Membership> {
    let membership = require_member(repo, room_id, user_id).await?;
    if membership.role != Role::Admin {
        return Err(AppError::Forbidden(format!("user {user_id} is not an admin of room {room_id}")));
    }
    Ok(membership)
}
