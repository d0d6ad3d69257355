pub mod auth;
pub mod chats;
pub mod cleanup;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod session;
pub mod socket;
pub mod state;
pub mod stream;
pub mod users;
pub mod validation;

use axum::{
    Json, Router,
    extract::Request,
    middleware as axum_middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

pub use crate::error::ApiError;
pub use crate::state::{AppState, AppStateInner, AuthConfig};

/// The full HTTP surface: `/health` plus everything under `/api/v1`.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/registration", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users))
        .route(
            "/users/{user_id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route(
            "/chats/{chat_id}",
            get(chats::get_chat)
                .put(chats::update_chat)
                .delete(chats::delete_chat),
        )
        .route("/chats/{chat_id}/restore", post(chats::restore_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}",
            get(messages::get_message)
                .put(messages::update_message)
                .delete(messages::delete_message),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}/restore",
            post(messages::restore_message),
        )
        .route("/chats/{chat_id}/events", get(stream::chat_events))
        .route("/events", get(stream::user_events))
        .route("/ws", get(socket::ws_upgrade))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", public.merge(protected))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Like tower-http's default span, but with the path only: `?accessToken=`
/// must not end up in logs.
fn request_span(req: &Request) -> Span {
    tracing::debug_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        version = ?req.version(),
    )
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use tower::ServiceExt;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_logs_leave_out_the_query_string() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let db = courier_store::Database::open(dir.path()).unwrap();
        let app = router(AppStateInner::new(db, AuthConfig::new("secret")));

        let request = axum::http::Request::builder()
            .uri("/api/v1/ws?accessToken=very-secret-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 401);

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("path=/api/v1/ws"), "{logs}");
        assert!(!logs.contains("very-secret-token"), "{logs}");
    }
}
