use std::time::Duration;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use courier_types::models::UserRole;

use crate::error::ApiError;
use crate::session;
use crate::state::AppState;

/// The authenticated caller, inserted as a request extension by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub username: String,
    pub role: UserRole,
    /// `exp` of the access token the request carried.
    pub token_expires_at: DateTime<Utc>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// How long the presented access token stays valid. Long-lived streams
    /// end when it runs out.
    pub fn token_ttl(&self) -> Duration {
        (self.token_expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

/// Validate the access token from `Authorization: Bearer` or, for clients
/// that cannot set headers (EventSource, browser WebSocket), `?accessToken=`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = access_token(&req) else {
        return Err(ApiError::unauthorized("Missing access token"));
    };

    let user = session::authenticate(&state, &token).await.inspect_err(|e| {
        warn!("Rejected {} {}: {}", req.method(), req.uri().path(), e);
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn access_token(req: &Request) -> Option<String> {
    if let Some(Authorization(bearer)) = req.headers().typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
}
