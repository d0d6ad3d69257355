use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::models::RecordStatus;

use crate::Database;
use crate::error::{Result, StoreError};
use crate::models::{MessageQuery, MessageRow, restored_status};

impl Database {
    pub fn insert_message(&self, row: MessageRow) -> Result<MessageRow> {
        self.messages.with_data_mut(|messages| {
            messages
                .entry(row.chat_id)
                .or_default()
                .insert(row.id, row.clone());
            Ok(row)
        })
    }

    pub fn get_message(&self, chat_id: Uuid, id: Uuid) -> Result<Option<MessageRow>> {
        self.messages.with_data(|messages| {
            Ok(messages.get(&chat_id).and_then(|chat| chat.get(&id)).cloned())
        })
    }

    /// The newest `query.limit` messages older than `query.before`, returned
    /// oldest first. A chat that never had a message yields an empty list.
    pub fn get_messages(&self, chat_id: Uuid, query: &MessageQuery) -> Result<Vec<MessageRow>> {
        self.messages.with_data(|messages| {
            let Some(chat) = messages.get(&chat_id) else {
                return Ok(Vec::new());
            };

            let mut rows: Vec<MessageRow> = chat
                .values()
                .filter(|m| query.include_deleted || !m.status.is_deleted())
                .filter(|m| query.is_before_cursor(m))
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.time_stamp.cmp(&b.time_stamp).then(a.id.cmp(&b.id)));

            let skip = rows.len().saturating_sub(query.limit);
            Ok(rows.split_off(skip))
        })
    }

    pub fn update_message_content(
        &self,
        chat_id: Uuid,
        id: Uuid,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.messages.with_data_mut(|messages| {
            let message = messages
                .get_mut(&chat_id)
                .and_then(|chat| chat.get_mut(&id))
                .ok_or(StoreError::NotFound("Message"))?;
            if message.status.is_deleted() {
                return Err(StoreError::conflict("Message is deleted"));
            }

            message.content = content;
            message.status = RecordStatus::Updated;
            message.edited_at = Some(now);
            Ok(message.clone())
        })
    }

    /// Soft delete (`deleted = true`) or restore. Both are idempotent.
    pub fn set_message_deleted(
        &self,
        chat_id: Uuid,
        id: Uuid,
        deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.messages.with_data_mut(|messages| {
            let message = messages
                .get_mut(&chat_id)
                .and_then(|chat| chat.get_mut(&id))
                .ok_or(StoreError::NotFound("Message"))?;

            if deleted && !message.status.is_deleted() {
                message.status = RecordStatus::Deleted;
                message.deleted_at = Some(now);
            } else if !deleted && message.status.is_deleted() {
                message.status = restored_status(message.edited_at.is_some());
                message.deleted_at = None;
            }

            Ok(message.clone())
        })
    }
}
