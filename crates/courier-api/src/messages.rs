use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use courier_store::models::{MessageQuery, MessageRow};
use courier_types::api::{DeletedResponse, SendMessageRequest, UpdateMessageRequest};
use courier_types::events::GatewayEvent;
use courier_types::models::{Message, RecordStatus};

use crate::chats::load_member_chat;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::validation::require_fields;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListQuery {
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<usize>,
    /// Cursor: the `timeStamp` of the oldest message already seen.
    pub before: Option<DateTime<Utc>>,
    /// Id of that message. Breaks ties between messages sharing `before`.
    pub before_id: Option<Uuid>,
}

impl MessageListQuery {
    fn into_store_query(self) -> MessageQuery {
        MessageQuery {
            include_deleted: self.include_deleted,
            before: self.before,
            before_id: self.before_id,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }
}

async fn load_message(
    state: &AppState,
    chat_id: Uuid,
    message_id: Uuid,
) -> Result<MessageRow, ApiError> {
    state
        .blocking(move |db| db.get_message(chat_id, message_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Message not found".into()))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    load_member_chat(&state, chat_id, &caller).await?;

    let query = query.into_store_query();
    let rows = state
        .blocking(move |db| db.get_messages(chat_id, &query))
        .await?;
    Ok(Json(rows.iter().map(|m| m.to_view()).collect()))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_fields(&[("content", req.content.as_str())])?;

    let chat = load_member_chat(&state, chat_id, &caller).await?;
    if chat.status.is_deleted() {
        return Err(ApiError::Conflict("Chat is deleted".into()));
    }

    let row = MessageRow {
        id: Uuid::new_v4(),
        chat_id,
        author: caller.user_id,
        content: req.content,
        time_stamp: Utc::now(),
        status: RecordStatus::Active,
        edited_at: None,
        deleted_at: None,
    };
    let message = state.blocking(move |db| db.insert_message(row)).await?;
    debug!("{} posted {} in {}", caller.username, message.id, chat_id);

    let view = message.to_view();
    state.dispatcher.publish_to_members(
        chat.members.iter().copied(),
        GatewayEvent::MessageCreate {
            message: view.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Message>, ApiError> {
    load_member_chat(&state, chat_id, &caller).await?;
    let message = load_message(&state, chat_id, message_id).await?;
    Ok(Json(message.to_view()))
}

/// Only the author may edit, and only while the chat is live.
pub async fn update_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<UpdateMessageRequest>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let Json(req) = payload?;
    require_fields(&[("content", req.content.as_str())])?;

    let chat = load_member_chat(&state, chat_id, &caller).await?;
    if chat.status.is_deleted() {
        return Err(ApiError::Conflict("Chat is deleted".into()));
    }
    let current = load_message(&state, chat_id, message_id).await?;
    if current.author != caller.user_id {
        return Err(ApiError::forbidden("Only the author can edit this message"));
    }

    let message = state
        .blocking(move |db| db.update_message_content(chat_id, message_id, req.content, Utc::now()))
        .await?;

    let view = message.to_view();
    state.dispatcher.publish_to_members(
        chat.members.iter().copied(),
        GatewayEvent::MessageUpdate {
            message: view.clone(),
        },
    );

    Ok(Json(view))
}

/// Authors may delete and restore their own messages while they are members;
/// admins may do so anywhere.
async fn load_for_moderation(
    state: &AppState,
    chat_id: Uuid,
    message_id: Uuid,
    caller: &AuthUser,
) -> Result<Vec<Uuid>, ApiError> {
    let chat = if caller.is_admin() {
        crate::chats::load_chat(state, chat_id).await?
    } else {
        load_member_chat(state, chat_id, caller).await?
    };
    let message = load_message(state, chat_id, message_id).await?;
    if message.author != caller.user_id && !caller.is_admin() {
        return Err(ApiError::forbidden("Only the author can delete this message"));
    }
    Ok(chat.members)
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(caller): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let members = load_for_moderation(&state, chat_id, message_id, &caller).await?;

    state
        .blocking(move |db| db.set_message_deleted(chat_id, message_id, true, Utc::now()))
        .await?;

    state.dispatcher.publish_to_members(
        members,
        GatewayEvent::MessageDelete {
            chat_id,
            message_id,
        },
    );

    Ok(Json(DeletedResponse { id: message_id }))
}

pub async fn restore_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Message>, ApiError> {
    let members = load_for_moderation(&state, chat_id, message_id, &caller).await?;

    let message = state
        .blocking(move |db| db.set_message_deleted(chat_id, message_id, false, Utc::now()))
        .await?;

    let view = message.to_view();
    state.dispatcher.publish_to_members(
        members,
        GatewayEvent::MessageRestore {
            message: view.clone(),
        },
    );

    Ok(Json(view))
}
