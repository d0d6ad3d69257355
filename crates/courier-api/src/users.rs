use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use courier_gateway::Revocation;
use courier_store::models::UserPatch;
use courier_types::api::{DeletedResponse, UpdateUserRequest};
use courier_types::events::GatewayEvent;
use courier_types::models::{User, UserRole};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::session;
use crate::state::AppState;
use crate::validation::{validate_email, validate_password, validate_username};

pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ApiError> {
    let rows = state.blocking(|db| db.list_users()).await?;
    Ok(Json(rows.iter().map(|u| u.to_view()).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .blocking(move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(row.to_view()))
}

fn ensure_self_or_admin(caller: &AuthUser, user_id: Uuid) -> Result<(), ApiError> {
    if caller.user_id == user_id || caller.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("You can only change your own account"))
    }
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    ensure_self_or_admin(&caller, user_id)?;

    if req.role.is_some() && !caller.is_admin() {
        return Err(ApiError::forbidden("Only admins can change roles"));
    }
    if let Some(username) = &req.username {
        validate_username(username)?;
    }
    if let Some(email) = &req.email {
        validate_email(email)?;
    }
    let password_hash = match &req.password {
        Some(password) => {
            validate_password(password)?;
            Some(session::hash_password(password)?)
        }
        None => None,
    };

    let status_changed = req.status.is_some();
    let patch = UserPatch {
        username: req.username,
        email: req.email,
        password_hash,
        role: req.role,
        status: req.status,
    };

    let user = state.blocking(move |db| db.update_user(user_id, patch)).await?;

    if user.role == UserRole::Blocked {
        let revoked = state
            .blocking(move |db| db.revoke_user_sessions(user_id))
            .await?;
        state.dispatcher.revoke(Revocation::User(user_id));
        info!("Blocked {} ({}), revoked {} sessions", user.username, user_id, revoked);
    }

    if status_changed {
        state.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username: user.username.clone(),
            status: user.status,
        });
    }

    Ok(Json(user.to_view()))
}

/// Hard delete. The user's sessions are revoked and they leave every chat.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self_or_admin(&caller, user_id)?;

    let (user, changed_chats) = state
        .blocking(move |db| {
            let user = db.delete_user(user_id)?;
            db.revoke_user_sessions(user_id)?;
            let chats = db.remove_member_everywhere(user_id)?;
            Ok((user, chats))
        })
        .await?;
    state.dispatcher.revoke(Revocation::User(user_id));

    for chat in changed_chats {
        state.dispatcher.publish_to_members(
            chat.members.iter().copied(),
            GatewayEvent::ChatUpdate {
                chat: chat.to_view(),
            },
        );
    }

    info!("Deleted user {} ({}) by {}", user.username, user_id, caller.user_id);
    Ok(Json(DeletedResponse { id: user_id }))
}
