pub mod error;
mod file;
pub mod models;
pub mod queries;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

pub use crate::error::{Result, StoreError};
use crate::file::JsonFile;
use crate::models::{ChatRow, MessageRow, SessionRow, UserRow};

pub const USERS_FILE: &str = "users.json";
pub const SESSIONS_FILE: &str = "sessions.json";
pub const CHATS_FILE: &str = "chats.json";
pub const MESSAGES_FILE: &str = "messages.json";

pub(crate) type UserTable = BTreeMap<Uuid, UserRow>;
pub(crate) type SessionTable = BTreeMap<Uuid, SessionRow>;
pub(crate) type ChatTable = BTreeMap<Uuid, ChatRow>;
/// chat_id -> message_id -> message
pub(crate) type MessageTable = BTreeMap<Uuid, BTreeMap<Uuid, MessageRow>>;

/// Flat-file database: one JSON document per entity kind.
///
/// Every operation reads the whole document, applies the change and writes it
/// back while holding that document's lock, so concurrent requests against
/// the same file are serialized. Operations block; async callers should run
/// them on `spawn_blocking`.
pub struct Database {
    users: JsonFile<UserTable>,
    sessions: JsonFile<SessionTable>,
    chats: JsonFile<ChatTable>,
    messages: JsonFile<MessageTable>,
}

impl Database {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let db = Self {
            users: JsonFile::open(dir.join(USERS_FILE))?,
            sessions: JsonFile::open(dir.join(SESSIONS_FILE))?,
            chats: JsonFile::open(dir.join(CHATS_FILE))?,
            messages: JsonFile::open(dir.join(MESSAGES_FILE))?,
        };

        info!("Database opened at {}", dir.display());
        Ok(db)
    }
}
