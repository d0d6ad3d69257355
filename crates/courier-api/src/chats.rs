use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use courier_store::models::{ChatPatch, ChatRow};
use courier_types::api::{CreateChatRequest, UpdateChatRequest};
use courier_types::events::GatewayEvent;
use courier_types::models::{Chat, ChatType, RecordStatus};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::validation::require_fields;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatListQuery {
    pub include_deleted: bool,
}

pub(crate) async fn load_chat(state: &AppState, chat_id: Uuid) -> Result<ChatRow, ApiError> {
    state
        .blocking(move |db| db.get_chat(chat_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found".into()))
}

/// Loads the chat and fails with 403 unless the caller is a member.
pub(crate) async fn load_member_chat(
    state: &AppState,
    chat_id: Uuid,
    caller: &AuthUser,
) -> Result<ChatRow, ApiError> {
    let chat = load_chat(state, chat_id).await?;
    if !chat.is_member(caller.user_id) {
        return Err(ApiError::forbidden("Not a member of this chat"));
    }
    Ok(chat)
}

fn ensure_can_manage(chat: &ChatRow, caller: &AuthUser) -> Result<(), ApiError> {
    if chat.creator_id == caller.user_id || caller.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the chat creator can do that"))
    }
}

/// Creator first, then the requested members in order, without duplicates.
fn member_list(creator_id: Uuid, requested: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    std::iter::once(creator_id)
        .chain(requested.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect()
}

fn check_shape(chat_type: ChatType, members: &[Uuid]) -> Result<(), ApiError> {
    if chat_type == ChatType::Private && members.len() != 2 {
        return Err(ApiError::BadRequest(
            "A private chat must have exactly two members".into(),
        ));
    }
    Ok(())
}

async fn check_members_exist(state: &AppState, members: Vec<Uuid>) -> Result<(), ApiError> {
    let unknown = state.blocking(move |db| db.unknown_users(&members)).await?;
    if unknown.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = unknown.iter().map(Uuid::to_string).collect();
    Err(ApiError::BadRequest(format!("Unknown members: {}", ids.join(", "))))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let user_id = caller.user_id;
    let rows = state
        .blocking(move |db| db.list_chats_for_member(user_id, query.include_deleted))
        .await?;
    Ok(Json(rows.iter().map(|c| c.to_view()).collect()))
}

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<CreateChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_fields(&[("name", req.name.as_str())])?;

    let members = member_list(caller.user_id, &req.members);
    check_shape(req.chat_type, &members)?;
    check_members_exist(&state, members.clone()).await?;

    let row = ChatRow {
        chat_id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description,
        chat_type: req.chat_type,
        members,
        creator_id: caller.user_id,
        status: RecordStatus::Active,
        created_at: Utc::now(),
        updated_at: None,
        deleted_at: None,
    };

    let chat = state.blocking(move |db| db.create_chat(row)).await?;
    info!("{} created chat {} ({})", caller.username, chat.name, chat.chat_id);

    let view = chat.to_view();
    state.dispatcher.publish_to_members(
        chat.members.iter().copied(),
        GatewayEvent::ChatCreate { chat: view.clone() },
    );

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Chat>, ApiError> {
    let chat = load_member_chat(&state, chat_id, &caller).await?;
    Ok(Json(chat.to_view()))
}

pub async fn update_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<UpdateChatRequest>, JsonRejection>,
) -> Result<Json<Chat>, ApiError> {
    let Json(req) = payload?;
    let current = load_chat(&state, chat_id).await?;
    ensure_can_manage(&current, &caller)?;

    if let Some(name) = &req.name {
        require_fields(&[("name", name.as_str())])?;
    }

    let members = req
        .members
        .as_deref()
        .map(|requested| member_list(current.creator_id, requested));
    check_shape(
        req.chat_type.unwrap_or(current.chat_type),
        members.as_deref().unwrap_or(&current.members),
    )?;
    if let Some(members) = &members {
        check_members_exist(&state, members.clone()).await?;
    }

    let patch = ChatPatch {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        chat_type: req.chat_type,
        members,
    };
    let chat = state
        .blocking(move |db| db.update_chat(chat_id, patch, Utc::now()))
        .await?;

    // Members who were just removed still hear about it
    let audience: HashSet<Uuid> = current
        .members
        .iter()
        .chain(chat.members.iter())
        .copied()
        .collect();
    let view = chat.to_view();
    state
        .dispatcher
        .publish_to_members(audience, GatewayEvent::ChatUpdate { chat: view.clone() });

    Ok(Json(view))
}

/// Soft delete. Returns the chat in its deleted state.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Chat>, ApiError> {
    let current = load_chat(&state, chat_id).await?;
    ensure_can_manage(&current, &caller)?;

    let chat = state
        .blocking(move |db| db.set_chat_deleted(chat_id, true, Utc::now()))
        .await?;
    info!("{} deleted chat {}", caller.username, chat_id);

    state
        .dispatcher
        .publish_to_members(chat.members.iter().copied(), GatewayEvent::ChatDelete { chat_id });

    Ok(Json(chat.to_view()))
}

pub async fn restore_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Chat>, ApiError> {
    let current = load_chat(&state, chat_id).await?;
    ensure_can_manage(&current, &caller)?;

    let chat = state
        .blocking(move |db| db.set_chat_deleted(chat_id, false, Utc::now()))
        .await?;
    info!("{} restored chat {}", caller.username, chat_id);

    let view = chat.to_view();
    state.dispatcher.publish_to_members(
        chat.members.iter().copied(),
        GatewayEvent::ChatRestore { chat: view.clone() },
    );

    Ok(Json(view))
}
