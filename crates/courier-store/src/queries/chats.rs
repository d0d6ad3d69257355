use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::models::RecordStatus;

use crate::error::{Result, StoreError};
use crate::models::{ChatPatch, ChatRow, restored_status};
use crate::{ChatTable, Database};

/// Chat names are unique per creator among chats that are not deleted.
fn name_taken(chats: &ChatTable, creator_id: Uuid, name: &str, except: Option<Uuid>) -> bool {
    chats.values().any(|c| {
        Some(c.chat_id) != except
            && c.creator_id == creator_id
            && !c.status.is_deleted()
            && c.name == name
    })
}

impl Database {
    pub fn create_chat(&self, row: ChatRow) -> Result<ChatRow> {
        self.chats.with_data_mut(|chats| {
            if name_taken(chats, row.creator_id, &row.name, None) {
                return Err(StoreError::conflict("Chat already exists"));
            }
            chats.insert(row.chat_id, row.clone());
            Ok(row)
        })
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Option<ChatRow>> {
        self.chats.with_data(|chats| Ok(chats.get(&id).cloned()))
    }

    /// Chats `user_id` belongs to, oldest first.
    pub fn list_chats_for_member(&self, user_id: Uuid, include_deleted: bool) -> Result<Vec<ChatRow>> {
        self.chats.with_data(|chats| {
            let mut rows: Vec<ChatRow> = chats
                .values()
                .filter(|c| c.is_member(user_id))
                .filter(|c| include_deleted || !c.status.is_deleted())
                .cloned()
                .collect();
            rows.sort_by_key(|c| c.created_at);
            Ok(rows)
        })
    }

    pub fn update_chat(&self, id: Uuid, patch: ChatPatch, now: DateTime<Utc>) -> Result<ChatRow> {
        self.chats.with_data_mut(|chats| {
            let current = chats.get(&id).ok_or(StoreError::NotFound("Chat"))?;
            if current.status.is_deleted() {
                return Err(StoreError::conflict("Chat is deleted"));
            }
            if let Some(name) = &patch.name {
                if name_taken(chats, current.creator_id, name, Some(id)) {
                    return Err(StoreError::conflict("Chat already exists"));
                }
            }

            let chat = chats.get_mut(&id).ok_or(StoreError::NotFound("Chat"))?;
            if let Some(name) = patch.name {
                chat.name = name;
            }
            if let Some(description) = patch.description {
                chat.description = description;
            }
            if let Some(chat_type) = patch.chat_type {
                chat.chat_type = chat_type;
            }
            if let Some(members) = patch.members {
                chat.members = members;
            }
            chat.status = RecordStatus::Updated;
            chat.updated_at = Some(now);

            Ok(chat.clone())
        })
    }

    /// Soft delete (`deleted = true`) or restore. Both are idempotent.
    /// Restoring fails if the creator has since made another chat with the
    /// same name.
    pub fn set_chat_deleted(&self, id: Uuid, deleted: bool, now: DateTime<Utc>) -> Result<ChatRow> {
        self.chats.with_data_mut(|chats| {
            let current = chats.get(&id).ok_or(StoreError::NotFound("Chat"))?;
            if deleted == current.status.is_deleted() {
                return Ok(current.clone());
            }
            if !deleted && name_taken(chats, current.creator_id, &current.name, Some(id)) {
                return Err(StoreError::conflict("Chat already exists"));
            }

            let chat = chats.get_mut(&id).ok_or(StoreError::NotFound("Chat"))?;
            if deleted {
                chat.status = RecordStatus::Deleted;
                chat.deleted_at = Some(now);
            } else {
                chat.status = restored_status(chat.updated_at.is_some());
                chat.deleted_at = None;
            }

            Ok(chat.clone())
        })
    }

    /// Removes `user_id` from every member list. Returns the chats that changed.
    pub fn remove_member_everywhere(&self, user_id: Uuid) -> Result<Vec<ChatRow>> {
        self.chats.with_data_mut(|chats| {
            let mut changed = Vec::new();
            for chat in chats.values_mut().filter(|c| c.is_member(user_id)) {
                chat.members.retain(|m| *m != user_id);
                changed.push(chat.clone());
            }
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_types::models::ChatType;

    use super::*;
    use crate::queries::test_support::open;

    fn chat(name: &str, creator_id: Uuid, members: Vec<Uuid>) -> ChatRow {
        ChatRow {
            chat_id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            chat_type: ChatType::Group,
            members,
            creator_id,
            status: RecordStatus::Active,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn name_is_unique_per_creator() {
        let (_dir, db) = open();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        db.create_chat(chat("general", alice, vec![alice])).unwrap();
        assert!(matches!(
            db.create_chat(chat("general", alice, vec![alice])),
            Err(StoreError::Conflict(_))
        ));

        // Someone else may reuse the name
        db.create_chat(chat("general", bob, vec![bob])).unwrap();
    }

    #[test]
    fn soft_delete_frees_the_name_and_blocks_restore() {
        let (_dir, db) = open();
        let alice = Uuid::new_v4();
        let first = db.create_chat(chat("general", alice, vec![alice])).unwrap();

        let deleted = db.set_chat_deleted(first.chat_id, true, Utc::now()).unwrap();
        assert_eq!(deleted.status, RecordStatus::Deleted);
        assert!(db.list_chats_for_member(alice, false).unwrap().is_empty());
        assert_eq!(db.list_chats_for_member(alice, true).unwrap().len(), 1);

        let second = db.create_chat(chat("general", alice, vec![alice])).unwrap();
        assert!(matches!(
            db.set_chat_deleted(first.chat_id, false, Utc::now()),
            Err(StoreError::Conflict(_))
        ));

        db.set_chat_deleted(second.chat_id, true, Utc::now()).unwrap();
        let restored = db.set_chat_deleted(first.chat_id, false, Utc::now()).unwrap();
        assert_eq!(restored.status, RecordStatus::Active);
        assert!(restored.deleted_at.is_none());
    }

    #[test]
    fn update_marks_updated_and_restore_keeps_it() {
        let (_dir, db) = open();
        let alice = Uuid::new_v4();
        let row = db.create_chat(chat("general", alice, vec![alice])).unwrap();

        let updated = db
            .update_chat(
                row.chat_id,
                ChatPatch {
                    description: Some("all hands".into()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(updated.status, RecordStatus::Updated);
        assert_eq!(updated.description, "all hands");

        db.set_chat_deleted(row.chat_id, true, Utc::now()).unwrap();
        assert!(matches!(
            db.update_chat(row.chat_id, ChatPatch::default(), Utc::now()),
            Err(StoreError::Conflict(_))
        ));

        let restored = db.set_chat_deleted(row.chat_id, false, Utc::now()).unwrap();
        assert_eq!(restored.status, RecordStatus::Updated);
    }

    #[test]
    fn member_removal() {
        let (_dir, db) = open();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_chat(chat("one", alice, vec![alice, bob])).unwrap();
        db.create_chat(chat("two", alice, vec![alice])).unwrap();

        let changed = db.remove_member_everywhere(bob).unwrap();
        assert_eq!(changed.len(), 1);
        assert!(db.list_chats_for_member(bob, true).unwrap().is_empty());
    }
}
