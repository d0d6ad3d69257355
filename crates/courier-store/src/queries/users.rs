use uuid::Uuid;

use courier_types::models::UserStatus;

use crate::Database;
use crate::error::{Result, StoreError};
use crate::models::{UserPatch, UserRow};

/// Emails compare case-insensitively; they are stored trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Database {
    pub fn create_user(&self, mut row: UserRow) -> Result<UserRow> {
        row.email = normalize_email(&row.email);

        self.users.with_data_mut(|users| {
            if users.values().any(|u| u.username == row.username) {
                return Err(StoreError::conflict("Username already taken"));
            }
            if users.values().any(|u| u.email == row.email) {
                return Err(StoreError::conflict("Email already registered"));
            }

            users.insert(row.user_id, row.clone());
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.users.with_data(|users| Ok(users.get(&id).cloned()))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let email = normalize_email(email);
        self.users
            .with_data(|users| Ok(users.values().find(|u| u.email == email).cloned()))
    }

    /// All users, oldest registration first.
    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.users.with_data(|users| {
            let mut rows: Vec<UserRow> = users.values().cloned().collect();
            rows.sort_by_key(|u| u.created_at);
            Ok(rows)
        })
    }

    /// Returns which of `ids` do not name a registered user.
    pub fn unknown_users(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        self.users.with_data(|users| {
            Ok(ids
                .iter()
                .filter(|id| !users.contains_key(id))
                .copied()
                .collect())
        })
    }

    pub fn update_user(&self, id: Uuid, patch: UserPatch) -> Result<UserRow> {
        self.users.with_data_mut(|users| {
            if let Some(username) = &patch.username {
                if users
                    .values()
                    .any(|u| u.user_id != id && &u.username == username)
                {
                    return Err(StoreError::conflict("Username already taken"));
                }
            }
            let email = patch.email.as_deref().map(normalize_email);
            if let Some(email) = &email {
                if users.values().any(|u| u.user_id != id && &u.email == email) {
                    return Err(StoreError::conflict("Email already registered"));
                }
            }

            let user = users.get_mut(&id).ok_or(StoreError::NotFound("User"))?;
            if let Some(username) = patch.username {
                user.username = username;
            }
            if let Some(email) = email {
                user.email = email;
            }
            if let Some(hash) = patch.password_hash {
                user.password_hash = hash;
            }
            if let Some(role) = patch.role {
                user.role = role;
            }
            if let Some(status) = patch.status {
                user.status = status;
            }

            Ok(user.clone())
        })
    }

    /// Presence bookkeeping. A user deleted while connected is not an error.
    pub fn set_user_status(&self, id: Uuid, status: UserStatus) -> Result<Option<UserRow>> {
        self.users.with_data_mut(|users| {
            Ok(users.get_mut(&id).map(|user| {
                user.status = status;
                user.clone()
            }))
        })
    }

    pub fn delete_user(&self, id: Uuid) -> Result<UserRow> {
        self.users
            .with_data_mut(|users| users.remove(&id).ok_or(StoreError::NotFound("User")))
    }
}
