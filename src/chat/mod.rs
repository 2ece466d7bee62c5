mod msg;
mod read;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{session::Caller, AppResult, AppState};

pub use msg::{MessageService, UNSENT_TEXT};
pub use read::{ReadOutcome, ReadReceiptTracker};
pub(crate) use read::unread_count;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send/{room_id}", post(send))
        .route("/read/{room_id}", post(read_some))
        .route("/read-all/{room_id}", post(read_all))
        .route("/unread-count/{room_id}", get(unread))
        .route("/search/{room_id}/{query}", get(search))
        .route("/global-search/{query}", get(global_search))
        .route("/unsend/{room_id}/{message_id}", patch(unsend))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageBody {
    text: String,
    reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReadBody {
    message_ids: Vec<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    Caller(user_id): Caller,
    State(chat): State<MessageService>,
    Path(room_id): Path<String>,

    Json(SendMessageBody { text, reply_to }): Json<SendMessageBody>,
) -> AppResult<Json<Value>> {
    let message = chat.send_message(&room_id, &user_id, &text, reply_to.as_deref()).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read_some(
    Caller(user_id): Caller,
    State(receipts): State<ReadReceiptTracker>,
    Path(room_id): Path<String>,

    Json(ReadBody { message_ids }): Json<ReadBody>,
) -> AppResult<Json<Value>> {
    let outcome = receipts.mark_messages_as_read(&room_id, &message_ids, &user_id).await?;
    Ok(Json(json!({ "success": true, "newlyRead": outcome.newly_read, "messageIds": outcome.message_ids })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read_all(
    Caller(user_id): Caller,
    State(receipts): State<ReadReceiptTracker>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let outcome = receipts.mark_all_as_read(&room_id, &user_id).await?;
    Ok(Json(json!({ "success": true, "newlyRead": outcome.newly_read, "messageIds": outcome.message_ids })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn unread(
    Caller(user_id): Caller,
    State(receipts): State<ReadReceiptTracker>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let count = receipts.count_unread_messages(&room_id, &user_id).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn search(
    Caller(user_id): Caller,
    State(chat): State<MessageService>,
    Path((room_id, query)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let messages = chat.search_messages(&room_id, &query, &user_id).await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn global_search(
    Caller(user_id): Caller,
    State(chat): State<MessageService>,
    Path(query): Path<String>,
) -> AppResult<Json<Value>> {
    let messages = chat.search_global_messages(&query, &user_id).await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn unsend(
    Caller(user_id): Caller,
    State(chat): State<MessageService>,
    Path((room_id, message_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    chat.unsend_message(&room_id, &message_id, &user_id).await?;
    Ok(Json(json!({ "success": true })))
}
