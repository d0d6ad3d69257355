use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courier_store::Database;
use courier_store::models::MessageQuery;
use courier_types::events::{GatewayCommand, GatewayEvent};
use courier_types::models::UserStatus;

use crate::dispatcher::{Broadcast, Dispatcher, Revocation};

/// Server sends a Ping every 15 seconds. Two missed Pongs (~30s) drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Everything the loop needs to know about the socket's owner.
#[derive(Clone)]
struct Peer {
    user_id: Uuid,
    session_id: Uuid,
    username: String,
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

/// Who opened the socket and how long their credentials hold.
pub struct Credentials {
    pub user_id: Uuid,
    pub username: String,
    pub session_id: Uuid,
    /// When the access token presented at the upgrade expires.
    pub expires_at: Instant,
    /// Subscribed before the upgrade completes so no revocation is missed.
    pub revocations: broadcast::Receiver<Revocation>,
}

/// Run a WebSocket whose access token was already checked at the HTTP
/// upgrade. Sends `Ready`, then relays events until either side goes away,
/// the session is revoked or the access token expires.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    credentials: Credentials,
) {
    let Credentials {
        user_id,
        username,
        session_id,
        expires_at,
        revocations,
    } = credentials;
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    let peer = Peer {
        user_id,
        session_id,
        username,
        db,
        dispatcher,
    };

    // Subscribe before announcing presence so this socket sees its own update
    let broadcast_rx = peer.dispatcher.subscribe();
    peer.dispatcher
        .user_online(user_id, || set_presence(&peer, UserStatus::Online))
        .await;

    let limits = Limits {
        expires_at,
        revocations,
    };
    run_connection_loop(sender, receiver, broadcast_rx, limits, &peer).await;

    peer.dispatcher
        .user_offline(user_id, || set_presence(&peer, UserStatus::Offline))
        .await;

    info!("{} ({}) disconnected from gateway", peer.username, user_id);
}

/// What ends a connection from the server side.
struct Limits {
    expires_at: Instant,
    revocations: broadcast::Receiver<Revocation>,
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<Broadcast>,
    limits: Limits,
    peer: &Peer,
) {
    // Replies to commands travel through here so that only the send task
    // writes to the socket.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    let (user_id, session_id) = (peer.user_id, peer.session_id);
    let Limits {
        expires_at,
        mut revocations,
    } = limits;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let expiry = tokio::time::sleep_until(expires_at);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                revoked = revocations.recv() => {
                    match revoked {
                        Ok(revocation) if revocation.ends(user_id, session_id) => {
                            info!("Session {} of {} revoked, closing gateway", session_id, user_id);
                            close(&mut sender, "Session revoked").await;
                            break;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Gateway for {} missed {} revocations, closing", user_id, n);
                            close(&mut sender, "Session state unknown").await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = &mut expiry => {
                    debug!("Access token of {} expired, closing gateway", user_id);
                    close(&mut sender, "Access token expired").await;
                    break;
                }
                result = broadcast_rx.recv() => {
                    let item = match result {
                        Ok(item) => item,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Gateway receiver for {} lagged by {} events", user_id, n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    if !item.reaches(user_id) || !is_subscribed(&send_subscriptions, item.chat_id()) {
                        continue;
                    }

                    if !send_event(&mut sender, &item.event).await {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_peer = peer.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        let reply = handle_command(&recv_peer, cmd, &subscriptions).await;
                        if let Some(event) = reply {
                            if reply_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_peer.username,
                            recv_peer.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let exception = GatewayEvent::Exception {
                            message: format!("Invalid command: {e}"),
                        };
                        if reply_tx.send(exception).is_err() {
                            break;
                        }
                    }
                },
                Message::Pong(_) => {
                    pong_received.store(true, Ordering::Release);
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
}

/// Chat-scoped events pass when the socket has not narrowed its
/// subscriptions, or when the chat is in the narrowed set.
fn is_subscribed(subscriptions: &Subscriptions, chat_id: Option<Uuid>) -> bool {
    let Some(chat_id) = chat_id else {
        return true;
    };
    let subs = subscriptions.read().unwrap_or_else(|e| e.into_inner());
    subs.is_empty() || subs.contains(&chat_id)
}

async fn handle_command(
    peer: &Peer,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) -> Option<GatewayEvent> {
    let user_id = peer.user_id;

    match cmd {
        GatewayCommand::GetChats => {
            let db = peer.db.clone();
            let result = tokio::task::spawn_blocking(move || db.list_chats_for_member(user_id, false)).await;
            Some(match flatten(result) {
                Ok(rows) => GatewayEvent::Chats {
                    chats: rows.iter().map(|c| c.to_view()).collect(),
                },
                Err(message) => GatewayEvent::Exception { message },
            })
        }

        GatewayCommand::GetMessages { chat_id } => {
            let db = peer.db.clone();
            let result = tokio::task::spawn_blocking(move || {
                let chat = db.get_chat(chat_id)?;
                match chat {
                    Some(chat) if chat.is_member(user_id) => {
                        db.get_messages(chat_id, &MessageQuery::default()).map(Some)
                    }
                    _ => Ok(None),
                }
            })
            .await;

            Some(match flatten(result) {
                Ok(Some(rows)) => GatewayEvent::Messages {
                    chat_id,
                    messages: rows.iter().map(|m| m.to_view()).collect(),
                },
                Ok(None) => GatewayEvent::Exception {
                    message: "Chat not found".into(),
                },
                Err(message) => GatewayEvent::Exception { message },
            })
        }

        GatewayCommand::Subscribe { chat_ids } => {
            debug!("{} subscribed to {} chats", user_id, chat_ids.len());
            let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
            *subs = chat_ids.into_iter().collect();
            None
        }
    }
}

/// Collapse a blocking-task result, logging internal failures. The returned
/// message is safe to show the client.
fn flatten<T>(
    result: Result<courier_store::Result<T>, tokio::task::JoinError>,
) -> Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("Gateway query failed: {}", e);
            Err("Internal server error".into())
        }
        Err(e) => {
            error!("Gateway task panicked: {}", e);
            Err("Internal server error".into())
        }
    }
}

/// Persist the new status and tell everyone.
async fn set_presence(peer: &Peer, status: UserStatus) {
    let db = peer.db.clone();
    let user_id = peer.user_id;
    let result = tokio::task::spawn_blocking(move || db.set_user_status(user_id, status)).await;
    if let Err(message) = flatten(result) {
        warn!("Could not persist presence for {}: {}", user_id, message);
    }

    peer.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
        user_id,
        username: peer.username.clone(),
        status,
    });
}

/// Policy-violation close frame; the client should refresh and reconnect.
async fn close(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.to_string().into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

/// Returns false once the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.name(), e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
