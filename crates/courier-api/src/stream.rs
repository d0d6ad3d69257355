use std::convert::Infallible;

use axum::{
    Extension,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::chats::load_member_chat;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// SSE stream of one chat's events. Members only.
pub async fn chat_events(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    load_member_chat(&state, chat_id, &caller).await?;

    debug!("{} subscribed to events of chat {}", caller.username, chat_id);
    let stream = event_stream(&state, &caller, Some(chat_id));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// SSE stream of everything the caller may see: their chats plus presence.
pub async fn user_events(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("{} subscribed to their events", caller.username);
    Sse::new(event_stream(&state, &caller, None)).keep_alive(KeepAlive::default())
}

/// The receivers are created here, before the handler returns, so nothing
/// published after the request was accepted is missed. The stream ends when
/// the caller's session or account is revoked or the access token expires.
fn event_stream(
    state: &AppState,
    caller: &AuthUser,
    chat_id: Option<Uuid>,
) -> impl Stream<Item = Result<Event, Infallible>> + use<> {
    let mut rx = state.dispatcher.subscribe();
    let mut revocations = state.dispatcher.subscribe_revocations();
    let (user_id, session_id) = (caller.user_id, caller.session_id);
    let expiry = tokio::time::sleep(caller.token_ttl());

    async_stream::stream! {
        tokio::pin!(expiry);
        loop {
            let result = tokio::select! {
                biased;
                revoked = revocations.recv() => match revoked {
                    Ok(revocation) if revocation.ends(user_id, session_id) => {
                        debug!("SSE stream of {} closed, session {} revoked", user_id, session_id);
                        break;
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("SSE subscriber {} missed {} revocations, closing", user_id, n);
                        break;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = &mut expiry => {
                    debug!("SSE stream of {} closed, access token expired", user_id);
                    break;
                }
                result = rx.recv() => result,
            };

            let item = match result {
                Ok(item) => item,
                Err(RecvError::Lagged(n)) => {
                    warn!("SSE subscriber {} lagged, skipped {} events", user_id, n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if !item.reaches(user_id) {
                continue;
            }
            if chat_id.is_some() && item.chat_id() != chat_id {
                continue;
            }

            match Event::default().event(item.event.name()).json_data(&*item.event) {
                Ok(event) => {
                    yield Ok(event);
                }
                Err(e) => {
                    error!("Failed to encode {} for SSE: {}", item.event.name(), e);
                }
            }
        }
    }
}
