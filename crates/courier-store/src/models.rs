//! Stored record types. These are what lands in the JSON files; they are
//! distinct from the courier-types API models so that secrets such as the
//! password hash never reach the wire by accident.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_types::models::{Chat, ChatType, Message, RecordStatus, User, UserRole, UserStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    /// Stored lower-cased.
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn to_view(&self) -> User {
        User {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            status: self.status,
            created_at: self.created_at,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.role == UserRole::Blocked
    }
}

#[derive(Debug, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
}

/// Server side of a login. Holds digests of refresh tokens, never the tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    /// Digest of the token that was rotated out last. Seeing it again means
    /// the refresh token leaked.
    #[serde(default)]
    pub previous_refresh_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

impl SessionRow {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

pub enum RotateOutcome {
    Rotated(SessionRow),
    /// The previous refresh token was presented again; the session is now revoked.
    Reused,
    /// Unknown session, stale token, or session no longer live.
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRow {
    pub chat_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub chat_type: ChatType,
    pub members: Vec<Uuid>,
    pub creator_id: Uuid,
    #[serde(default)]
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ChatRow {
    pub fn to_view(&self) -> Chat {
        Chat {
            chat_id: self.chat_id,
            name: self.name.clone(),
            description: self.description.clone(),
            chat_type: self.chat_type,
            members: self.members.clone(),
            creator_id: self.creator_id,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }
}

#[derive(Debug, Default)]
pub struct ChatPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub chat_type: Option<ChatType>,
    pub members: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub author: Uuid,
    pub content: String,
    pub time_stamp: DateTime<Utc>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    pub fn to_view(&self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            author: self.author,
            content: self.content.clone(),
            time_stamp: self.time_stamp,
            status: self.status,
            edited_at: self.edited_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub include_deleted: bool,
    /// Only messages strictly older than this.
    pub before: Option<DateTime<Utc>>,
    /// With `before`, the cursor is the pair `(before, before_id)` and
    /// messages sharing that timestamp but with a lower id still come back.
    pub before_id: Option<Uuid>,
    pub limit: usize,
}

impl MessageQuery {
    pub fn is_before_cursor(&self, message: &MessageRow) -> bool {
        match (self.before, self.before_id) {
            (None, _) => true,
            (Some(before), None) => message.time_stamp < before,
            (Some(before), Some(before_id)) => (message.time_stamp, message.id) < (before, before_id),
        }
    }
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            include_deleted: false,
            before: None,
            before_id: None,
            limit: 50,
        }
    }
}

/// Status a record returns to when it is restored.
pub(crate) fn restored_status(edited: bool) -> RecordStatus {
    if edited {
        RecordStatus::Updated
    } else {
        RecordStatus::Active
    }
}
