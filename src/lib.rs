pub mod appresult;
pub mod chat;
pub mod config;
pub mod db;
pub mod guard;
pub mod hub;
pub mod rooms;
pub mod session;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};

pub use appresult::{AppError, AppResult};
pub use config::Config;

use chat::{MessageService, ReadReceiptTracker};
use db::Repository;
use hub::{EventSink, Hub};
use rooms::{MembershipManager, RoomDirectory};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub repo: Repository,
    pub hub: Arc<Hub>,
    pub rooms: MembershipManager,
    pub directory: RoomDirectory,
    pub chat: MessageService,
    pub receipts: ReadReceiptTracker,
}

impl AppState {
    pub fn new(repo: Repository, hub: Arc<Hub>) -> Self {
        let sink: Arc<dyn EventSink> = hub.clone();
        let chat = MessageService::new(repo.clone(), sink.clone());
        let receipts = ReadReceiptTracker::new(repo.clone(), sink.clone());

        AppState {
            rooms: MembershipManager::new(repo.clone(), sink, chat.clone()),
            directory: RoomDirectory::new(repo.clone(), receipts.clone()),
            chat,
            receipts,
            repo,
            hub,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/room", rooms::router())
        .nest("/chat", chat::router())
        .route("/ws", get(hub::socket))
}
