use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_core::Permission;
use parley_db::Database;
use parley_types::api::Claims;
use parley_types::events::{CallSignalPayload, GatewayCommand, GatewayEvent};
use parley_types::models::ChatRef;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket has to send a valid Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Everything a connection needs besides its socket.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

/// Handle a single WebSocket connection: Identify handshake, then the
/// event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, ctx, user_id, username).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    ctx: GatewayContext,
    user_id: Uuid,
    username: String,
) {
    let dispatcher = ctx.dispatcher.clone();
    let (conn_id, mut user_rx) = dispatcher.register_connection(user_id).await;

    // Send existing online users so the client sees who's already here
    for (uid, uname) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            username: uname,
            online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            dispatcher.unregister_connection(user_id, conn_id).await;
            return;
        }
    }

    dispatcher.user_online(user_id, username.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let event = tokio::select! {
                result = broadcast_rx.recv() => match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} messages", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                result = user_rx.recv() => match result {
                    Some(event) => event,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if !should_deliver(&event, &send_subscriptions) {
                continue;
            }
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    let recv_ctx = ctx.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_ctx, user_id, &recv_username, cmd, &subscriptions)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_username,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Ephemeral room events only reach connections that have the room open.
fn should_deliver(event: &GatewayEvent, subscriptions: &Subscriptions) -> bool {
    if !event.is_ephemeral() {
        return true;
    }
    match event.room() {
        Some(room) => subscriptions
            .read()
            .map(|subs| subs.contains(&room))
            .unwrap_or(false),
        None => true,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

fn verify_token(token: &str, jwt_secret: &str) -> Option<(Uuid, String)> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some((data.claims.sub, data.claims.username))
}

async fn handle_command(
    ctx: &GatewayContext,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { rooms } => {
            debug!("{} ({}) subscribing to {} rooms", username, user_id, rooms.len());
            if let Ok(mut subs) = subscriptions.write() {
                *subs = rooms.into_iter().collect();
            }
        }

        GatewayCommand::StartTyping { chat } => {
            let event = GatewayEvent::TypingStart {
                chat,
                user_id,
                username: username.to_string(),
            };
            match chat {
                ChatRef::Group(group_id) => {
                    let Some(recipients) = typing_recipients(ctx, group_id, user_id).await else {
                        return;
                    };
                    ctx.dispatcher.send_to_users(recipients, event).await;
                }
                ChatRef::Direct(peer) => {
                    // The peer sees the chat keyed by the typist
                    let event = GatewayEvent::TypingStart {
                        chat: ChatRef::Direct(user_id),
                        user_id,
                        username: username.to_string(),
                    };
                    ctx.dispatcher.send_to_user(peer, event).await;
                }
                ChatRef::Channel(_) => {}
            }
        }

        GatewayCommand::CallSignalSend {
            call_id,
            target_user_id,
            signal,
        } => {
            let signal_desc = match &signal {
                CallSignalPayload::Offer { .. } => "Offer",
                CallSignalPayload::Answer { .. } => "Answer",
                CallSignalPayload::IceCandidate { .. } => "IceCandidate",
            };
            if !call_peers(ctx, call_id, user_id, target_user_id).await {
                warn!(
                    "{} ({}) call signal to {} rejected: not both in call {}",
                    username, user_id, target_user_id, call_id
                );
                return;
            }
            debug!(
                "{} ({}) -> call {} to {}",
                username, user_id, signal_desc, target_user_id
            );
            ctx.dispatcher
                .send_to_user(
                    target_user_id,
                    GatewayEvent::CallSignal {
                        from_user_id: user_id,
                        call_id,
                        signal,
                    },
                )
                .await;
        }
    }
}

/// Members other than the typist, if the typist may chat in the group.
async fn typing_recipients(ctx: &GatewayContext, group_id: Uuid, user_id: Uuid) -> Option<Vec<Uuid>> {
    let db = ctx.db.clone();
    let group = tokio::task::spawn_blocking(move || db.get_group(group_id))
        .await
        .ok()?
        .ok()?;
    if !group.permits(user_id, Permission::SendMessages) {
        return None;
    }
    Some(group.member_ids().into_iter().filter(|id| *id != user_id).collect())
}

async fn call_peers(ctx: &GatewayContext, call_id: Uuid, from: Uuid, to: Uuid) -> bool {
    let db = ctx.db.clone();
    let participants =
        tokio::task::spawn_blocking(move || db.get_call_participants(&call_id.to_string())).await;
    match participants {
        Ok(Ok(ids)) => {
            let (from, to) = (from.to_string(), to.to_string());
            from != to && ids.contains(&from) && ids.contains(&to)
        }
        Ok(Err(e)) => {
            error!("Failed to load call participants: {}", e);
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_needs_an_open_room() {
        let room = Uuid::new_v4();
        let subs: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
        let typing = GatewayEvent::TypingStart {
            chat: ChatRef::Group(room),
            user_id: Uuid::new_v4(),
            username: "ann".into(),
        };
        assert!(!should_deliver(&typing, &subs));

        subs.write().unwrap().insert(room);
        assert!(should_deliver(&typing, &subs));
    }

    #[test]
    fn durable_events_ignore_subscriptions() {
        let subs: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
        let removed = GatewayEvent::GroupRemoved {
            group_id: Uuid::new_v4(),
            reason: parley_types::events::RemovalReason::Banned,
        };
        assert!(should_deliver(&removed, &subs));
    }

    #[test]
    fn tokens_signed_with_another_secret_are_refused() {
        use jsonwebtoken::{EncodingKey, Header, encode};

        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "ann".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"right")).unwrap();
        assert_eq!(verify_token(&token, "right").map(|(id, _)| id), Some(claims.sub));
        assert!(verify_token(&token, "wrong").is_none());
    }
}
