use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use courier_gateway::Revocation;
use courier_store::models::UserRow;
use courier_types::api::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest};
use courier_types::models::{UserRole, UserStatus};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::session;
use crate::state::AppState;
use crate::validation::{require_fields, validate_email, validate_password, validate_username};

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_fields(&[
        ("username", req.username.as_str()),
        ("email", req.email.as_str()),
        ("password", req.password.as_str()),
    ])?;
    validate_username(&req.username)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let role = if state.auth.is_admin_email(&req.email) {
        UserRole::Admin
    } else {
        UserRole::User
    };

    let row = UserRow {
        user_id: Uuid::new_v4(),
        username: req.username,
        email: req.email,
        password_hash: session::hash_password(&req.password)?,
        role,
        status: UserStatus::Offline,
        created_at: Utc::now(),
    };

    let user = state.blocking(move |db| db.create_user(row)).await?;
    info!("Registered {} ({}) as {:?}", user.username, user.user_id, user.role);

    let tokens = session::issue(&state, &user).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.to_view(),
            tokens,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = payload?;
    require_fields(&[("email", req.email.as_str()), ("password", req.password.as_str())])?;

    let email = req.email.clone();
    let user = state
        .blocking(move |db| db.get_user_by_email(&email))
        .await?
        .filter(|u| session::verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if user.is_blocked() {
        return Err(ApiError::forbidden("User is blocked"));
    }

    let tokens = session::issue(&state, &user).await?;
    Ok(Json(AuthResponse {
        user: user.to_view(),
        tokens,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_fields(&[("refreshToken", req.refresh_token.as_str())])?;

    let tokens = session::rotate(&state, &req.refresh_token).await?;
    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let session_id = user.session_id;
    state.blocking(move |db| db.revoke_session(session_id)).await?;
    state.dispatcher.revoke(Revocation::Session(session_id));

    info!("{} ({}) logged out of session {}", user.username, user.user_id, session_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user_id;
    let row = state
        .blocking(move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(row.to_view()))
}
