use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{db::{now_millis, Repository}, session::Caller, AppState};

use super::{ClientEvent, ConnId, EventSink, Hub, Outbox, ServerEvent};

#[debug_handler(state = AppState)]
pub async fn socket(
    Caller(user_id): Caller,
    State(repo): State<Repository>,
    State(hub): State<Arc<Hub>>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| serve(stream, repo, hub, user_id).await)
}

async fn serve(stream: WebSocket, repo: Repository, hub: Arc<Hub>, user_id: String) {
    let (outbox, mut inbox) = mpsc::unbounded_channel::<Arc<ServerEvent>>();
    let conn = connect(&repo, &hub, &user_id, outbox).await;

    let (mut sender, mut receiver) = stream.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match serde_json::to_string(&*event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(%err, "dropping unserializable event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let msg = match frame {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => msg,
                    Some(Ok(_)) => continue,
                };
                let Ok(event) = serde_json::from_slice::<ClientEvent>(&msg.into_data()) else {
                    tracing::debug!(conn, "ignoring malformed frame");
                    continue;
                };
                handle(&repo, &hub, conn, &user_id, event).await;
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    disconnect(&repo, &hub, conn).await;
}

/// Registers the connection, subscribes it to every room the user is an
/// active member of, and flips presence on for a first connection.
async fn connect(repo: &Repository, hub: &Hub, user_id: &str, outbox: Outbox) -> ConnId {
    let (conn, first) = hub.register(user_id, outbox);

    match repo.active_room_ids(user_id).await {
        Ok(rooms) => hub.join_all(conn, &rooms),
        Err(err) => tracing::warn!(%err, user_id, "could not load rooms for new connection"),
    }

    if first {
        if let Err(err) = repo.set_presence(user_id, true, now_millis()).await {
            tracing::warn!(%err, user_id, "presence not persisted");
        }
        hub.to_everyone(ServerEvent::UserOnline { user_id: user_id.to_owned() });
    }

    conn
}

async fn disconnect(repo: &Repository, hub: &Hub, conn: ConnId) {
    let Some((user_id, true)) = hub.unregister(conn) else {
        return;
    };

    let now = now_millis();
    if let Err(err) = repo.set_presence(&user_id, false, now).await {
        tracing::warn!(%err, %user_id, "presence not persisted");
    }
    hub.to_everyone(ServerEvent::UserOffline { user_id, last_seen_at: now });
}

async fn handle(repo: &Repository, hub: &Hub, conn: ConnId, user_id: &str, event: ClientEvent) {
    match event {
        ClientEvent::JoinRoom(room_id) => {
            let membership = match repo.active_membership(&room_id, user_id).await {
                Ok(membership) => membership,
                Err(err) => {
                    tracing::warn!(%err, %room_id, "join_room check failed");
                    return;
                }
            };
            if membership.is_some_and(|m| m.is_current()) {
                hub.join(conn, &room_id);
            } else {
                tracing::debug!(conn, %room_id, user_id, "join_room refused for non-member");
            }
        }
        ClientEvent::LeaveRoom(room_id) => {
            hub.leave(conn, &room_id);
        }
        ClientEvent::TypingStart(room_id) => {
            let event = ServerEvent::UserTyping { room_id: room_id.clone(), user_id: user_id.to_owned() };
            hub.relay(conn, &room_id, event);
        }
        ClientEvent::TypingStop(room_id) => {
            let event = ServerEvent::UserStoppedTyping { room_id: room_id.clone(), user_id: user_id.to_owned() };
            hub.relay(conn, &room_id, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Role, Room};

    async fn seeded() -> Repository {
        let repo = Repository::in_memory().await.unwrap();
        for (id, name) in [("a", "Ann"), ("b", "Bob"), ("d", "Dee")] {
            repo.upsert_user(id, name, None).await.unwrap();
        }
        let room = Room {
            id: "r".into(),
            name: Some("Team".into()),
            is_group: true,
            is_private: true,
            image_url: None,
            created_by: "a".into(),
            created_at: now_millis(),
            deleted_at: None,
        };
        repo.create_room(&room, &[("a".into(), Role::Admin), ("b".into(), Role::Member)])
            .await
            .unwrap();
        repo
    }

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn connecting_joins_active_rooms_and_goes_online() {
        let repo = seeded().await;
        let hub = Hub::new();
        let (tx, mut rx) = outbox();

        let conn = connect(&repo, &hub, "b", tx).await;

        assert!(hub.has_joined(conn, "r"));
        assert!(repo.get_user("b").await.unwrap().unwrap().is_online);
        assert_eq!(*rx.try_recv().unwrap(), ServerEvent::UserOnline { user_id: "b".into() });
    }

    #[tokio::test]
    async fn pending_requests_are_not_auto_joined() {
        let repo = seeded().await;
        repo.insert_membership("r", "d", Role::Member, false, None, now_millis()).await.unwrap();
        let hub = Hub::new();
        let (tx, _rx) = outbox();

        let conn = connect(&repo, &hub, "d", tx).await;
        assert!(!hub.has_joined(conn, "r"));
    }

    #[tokio::test]
    async fn join_room_is_refused_without_current_membership() {
        let repo = seeded().await;
        let hub = Hub::new();

        let (tx, _rx) = outbox();
        let outsider = connect(&repo, &hub, "d", tx).await;
        handle(&repo, &hub, outsider, "d", ClientEvent::JoinRoom("r".into())).await;
        assert!(!hub.has_joined(outsider, "r"));

        repo.insert_membership("r", "d", Role::Member, false, None, now_millis()).await.unwrap();
        handle(&repo, &hub, outsider, "d", ClientEvent::JoinRoom("r".into())).await;
        assert!(!hub.has_joined(outsider, "r"));

        repo.approve_membership("r", "d").await.unwrap();
        handle(&repo, &hub, outsider, "d", ClientEvent::JoinRoom("r".into())).await;
        assert!(hub.has_joined(outsider, "r"));

        handle(&repo, &hub, outsider, "d", ClientEvent::LeaveRoom("r".into())).await;
        assert!(!hub.has_joined(outsider, "r"));
    }

    #[tokio::test]
    async fn typing_reaches_other_members_only() {
        let repo = seeded().await;
        let hub = Hub::new();
        let (tx_a, mut rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();
        let a = connect(&repo, &hub, "a", tx_a).await;
        connect(&repo, &hub, "b", tx_b).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        handle(&repo, &hub, a, "a", ClientEvent::TypingStart("r".into())).await;

        assert!(rx_a.try_recv().is_err());
        assert_eq!(*rx_b.try_recv().unwrap(), ServerEvent::UserTyping {
            room_id: "r".into(),
            user_id: "a".into(),
        });
    }

    #[tokio::test]
    async fn presence_drops_with_the_last_connection() {
        let repo = seeded().await;
        let hub = Hub::new();
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();
        let (watch_tx, mut watch) = outbox();
        connect(&repo, &hub, "a", watch_tx).await;

        let first = connect(&repo, &hub, "b", tx1).await;
        let second = connect(&repo, &hub, "b", tx2).await;
        while watch.try_recv().is_ok() {}

        disconnect(&repo, &hub, first).await;
        assert!(repo.get_user("b").await.unwrap().unwrap().is_online);
        assert!(watch.try_recv().is_err());

        disconnect(&repo, &hub, second).await;
        let user = repo.get_user("b").await.unwrap().unwrap();
        assert!(!user.is_online);
        assert!(user.last_seen_at.is_some());
        assert!(matches!(
            &*watch.try_recv().unwrap(),
            ServerEvent::UserOffline { user_id, .. } if user_id == "b"
        ));
    }
}
