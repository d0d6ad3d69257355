use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use tokio::time::Instant;

use courier_gateway::{Credentials, handle_connection_authenticated};

use crate::middleware::AuthUser;
use crate::state::AppState;

/// The token was checked by `require_auth` before the upgrade, so the
/// gateway skips any identify handshake and starts with `Ready`.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    let credentials = Credentials {
        user_id: caller.user_id,
        session_id: caller.session_id,
        expires_at: Instant::now() + caller.token_ttl(),
        revocations: dispatcher.subscribe_revocations(),
        username: caller.username,
    };
    ws.on_upgrade(move |socket| handle_connection_authenticated(socket, dispatcher, db, credentials))
}
