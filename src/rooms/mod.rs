mod manager;
mod view;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{session::Caller, AppResult, AppState};

pub use manager::{JoinOutcome, MembershipManager, NewRoom, RoomRef};
pub use view::{display_name, PageQuery, RoomDetail, RoomDirectory, RoomSummary};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/active", get(active))
        .route("/deactivated", get(deactivated))
        .route("/messages/{room_id}", get(messages))
        .route("/approve/{room_id}/{user_id}", post(approve))
        .route("/reject/{room_id}/{user_id}", post(reject))
        .route("/leave/{room_id}", post(leave))
        .route("/add-members/{room_id}", post(add_members))
        .route("/remove-members/{room_id}", post(remove_members))
        .route("/promote/{room_id}/{user_id}", post(promote))
        .route("/demote/{room_id}/{user_id}", post(demote))
        .route("/image/{room_id}", patch(set_image))
        .route("/{room_id}", get(detail).post(join).delete(delete))
}

#[derive(Debug, Deserialize)]
pub(crate) struct MembersBody {
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageBody {
    image_url: String,
}

fn done() -> Json<Value> {
    Json(json!({ "success": true }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,

    Json(request): Json<NewRoom>,
) -> AppResult<Json<Value>> {
    let RoomRef { room_id, created } = rooms.create_room(&user_id, request).await?;
    Ok(Json(json!({ "success": true, "roomId": room_id, "created": created })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn join(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let message = match rooms.join_room(&room_id, &user_id).await? {
        JoinOutcome::Joined => "joined the room",
        JoinOutcome::Pending => "join request sent to the room admins",
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn approve(
    Caller(admin_id): Caller,
    State(rooms): State<MembershipManager>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    rooms.approve_join_request(&room_id, &user_id, &admin_id).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn reject(
    Caller(admin_id): Caller,
    State(rooms): State<MembershipManager>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    rooms.reject_join_request(&room_id, &user_id, &admin_id).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn leave(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    rooms.leave_room(&room_id, &user_id).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    rooms.delete_room(&room_id, &user_id).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn add_members(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,
    Path(room_id): Path<String>,

    Json(MembersBody { members }): Json<MembersBody>,
) -> AppResult<Json<Value>> {
    rooms.add_members(&room_id, &user_id, &members).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove_members(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,
    Path(room_id): Path<String>,

    Json(MembersBody { members }): Json<MembersBody>,
) -> AppResult<Json<Value>> {
    rooms.remove_members(&room_id, &user_id, &members).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn promote(
    Caller(actor_id): Caller,
    State(rooms): State<MembershipManager>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    rooms.promote_to_admin(&room_id, &actor_id, &user_id).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn demote(
    Caller(actor_id): Caller,
    State(rooms): State<MembershipManager>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    rooms.demote_from_admin(&room_id, &actor_id, &user_id).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn set_image(
    Caller(user_id): Caller,
    State(rooms): State<MembershipManager>,
    Path(room_id): Path<String>,

    Json(ImageBody { image_url }): Json<ImageBody>,
) -> AppResult<Json<Value>> {
    rooms.set_room_image(&room_id, &user_id, &image_url).await?;
    Ok(done())
}

#[debug_handler(state = AppState)]
pub(crate) async fn active(
    Caller(user_id): Caller,
    State(directory): State<RoomDirectory>,
) -> AppResult<Json<Value>> {
    let rooms = directory.active_rooms(&user_id).await?;
    Ok(Json(json!({ "success": true, "rooms": rooms })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn deactivated(
    Caller(user_id): Caller,
    State(directory): State<RoomDirectory>,
) -> AppResult<Json<Value>> {
    let rooms = directory.deactivated_rooms(&user_id).await?;
    Ok(Json(json!({ "success": true, "rooms": rooms })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn detail(
    Caller(user_id): Caller,
    State(directory): State<RoomDirectory>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let room = directory.room_detail(&room_id, &user_id).await?;
    Ok(Json(json!({ "success": true, "room": room })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn messages(
    Caller(user_id): Caller,
    State(directory): State<RoomDirectory>,
    Path(room_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let messages = directory.messages(&room_id, &user_id, &page).await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}
